//! Named middlewares plus the store handle they run against.
//!
//! Built once at startup and passed explicitly; immutable afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::blob_store::BlobStore;
use crate::error::PipelineError;
use crate::keys::BucketStrategy;
use crate::pipeline::{BlobTerminal, Middleware, MiddlewareChain};

pub struct Registry {
    store: Arc<dyn BlobStore>,
    buckets: BucketStrategy,
    presign_ttl: Duration,
    middlewares: HashMap<&'static str, Arc<dyn Middleware>>,
}

impl Registry {
    pub fn new(store: Arc<dyn BlobStore>, buckets: BucketStrategy, presign_ttl: Duration) -> Self {
        Self {
            store,
            buckets,
            presign_ttl,
            middlewares: HashMap::new(),
        }
    }

    /// Register a middleware under its own name. Duplicate names are an error.
    pub fn register(&mut self, middleware: Arc<dyn Middleware>) -> Result<(), PipelineError> {
        let name = middleware.name();
        if self.middlewares.contains_key(name) {
            return Err(PipelineError::invalid_input(format!(
                "Middleware '{name}' is already registered"
            )));
        }
        self.middlewares.insert(name, middleware);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Middleware>> {
        self.middlewares.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.middlewares.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn buckets(&self) -> &BucketStrategy {
        &self.buckets
    }

    /// Build a chain over the blob store with middlewares in `order`.
    pub fn build_chain<S: AsRef<str>>(&self, order: &[S]) -> Result<MiddlewareChain, PipelineError> {
        let terminal = BlobTerminal::new(
            Arc::clone(&self.store),
            self.buckets.clone(),
            self.presign_ttl,
        );
        let mut chain = MiddlewareChain::with_terminal(Arc::new(terminal));

        for name in order {
            let name = name.as_ref().trim();
            let middleware = self.get(name).ok_or_else(|| {
                PipelineError::invalid_input(format!("Unknown middleware '{name}'"))
            })?;
            if chain.names().contains(&middleware.name()) {
                return Err(PipelineError::invalid_input(format!(
                    "Middleware '{name}' listed more than once"
                )));
            }
            chain.add(Arc::clone(middleware));
        }

        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryStore;
    use crate::middleware::{AuditMiddleware, EncryptionMiddleware};

    fn registry() -> Registry {
        Registry::new(
            Arc::new(MemoryStore::new()),
            BucketStrategy::Single("files".into()),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = registry();
        registry.register(Arc::new(AuditMiddleware)).unwrap();
        assert!(registry.register(Arc::new(AuditMiddleware)).is_err());
    }

    #[test]
    fn builds_chain_in_requested_order() {
        let mut registry = registry();
        registry.register(Arc::new(AuditMiddleware)).unwrap();
        registry.register(Arc::new(EncryptionMiddleware)).unwrap();

        let chain = registry.build_chain(&["encryption", "audit"]).unwrap();
        assert_eq!(chain.names(), vec!["encryption", "audit"]);

        assert!(registry.build_chain(&["audit", "missing"]).is_err());
        assert!(registry.build_chain(&["audit", "audit"]).is_err());
    }
}
