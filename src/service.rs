//! Wires configuration, store, middlewares and background workers together.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::config::Config;
use crate::error::PipelineError;
use crate::middleware::{
    AccessPolicy, AuditMiddleware, CacheMiddleware, CacheStats, EncryptionMiddleware,
    GenerationMode, RequireIdentity, SecurityMiddleware, ThumbnailMiddleware,
    ValidationMiddleware,
};
use crate::pipeline::{
    ArtifactInfo, MiddlewareChain, Operation, RequestContext, StorageRequest, StorageResponse,
};
use crate::registry::Registry;
use crate::thumbnails::{JobQueue, QueueStats, ThumbnailRenderer};

/// Schema version of [`FileMetadata`] records.
pub const METADATA_VERSION: u32 = 1;

/// Record handed to metadata callbacks after an upload is stored.
#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    pub id: Uuid,
    pub file_name: String,
    pub file_key: String,
    pub file_size: u64,
    pub content_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    pub artifacts: Vec<ArtifactInfo>,
    pub version: u32,
}

/// Hook for persisting upload records elsewhere. Failures are logged and
/// never undo the upload.
#[async_trait]
pub trait MetadataCallback: Send + Sync {
    async fn on_uploaded(&self, metadata: &FileMetadata) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ServiceStats {
    pub cache: Option<CacheStats>,
    pub queue: Option<QueueStats>,
}

pub struct StorageService {
    chain: MiddlewareChain,
    registry: Registry,
    queue: Option<Arc<JobQueue>>,
    cache: Option<Arc<CacheMiddleware>>,
    callbacks: Vec<Arc<dyn MetadataCallback>>,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl StorageService {
    /// Start the service with the default access policy.
    pub fn start(config: &Config, store: Arc<dyn BlobStore>) -> Result<Self, PipelineError> {
        Self::start_with_policy(config, store, Arc::new(RequireIdentity))
    }

    /// Build every middleware, register them, build the configured chain and
    /// start the background workers it needs. Must run inside a tokio runtime.
    pub fn start_with_policy(
        config: &Config,
        store: Arc<dyn BlobStore>,
        policy: Arc<dyn AccessPolicy>,
    ) -> Result<Self, PipelineError> {
        let enabled = |name: &str| config.middleware_order.iter().any(|n| n == name);
        let buckets = config.storage.buckets.clone();
        let mut registry = Registry::new(
            Arc::clone(&store),
            buckets.clone(),
            config.storage.presign_ttl,
        );

        let renderer = Arc::new(ThumbnailRenderer::new(
            Arc::clone(&store),
            config.thumbnails.jpeg_quality,
        ));
        let queue = (enabled("thumbnail") && config.thumbnails.async_enabled).then(|| {
            Arc::new(JobQueue::start(
                config.thumbnails.queue.clone(),
                renderer.clone(),
            ))
        });
        let mode = match &queue {
            Some(queue) => GenerationMode::Async(Arc::clone(queue)),
            None => GenerationMode::Sync(renderer),
        };

        let cache = Arc::new(
            CacheMiddleware::new(config.cache.clone()).with_derived_labels(
                config.thumbnails.sizes.iter().map(|size| size.label.clone()),
            ),
        );

        registry.register(Arc::new(SecurityMiddleware::new(policy)))?;
        registry.register(Arc::new(ValidationMiddleware::new(
            config.max_upload_size,
            config.allowed_content_types.clone(),
        )))?;
        registry.register(Arc::new(ThumbnailMiddleware::new(
            config.thumbnails.sizes.clone(),
            buckets,
            store,
            mode,
        )))?;
        registry.register(Arc::new(EncryptionMiddleware))?;
        registry.register(Arc::new(AuditMiddleware))?;
        registry.register(cache.clone())?;

        let chain = registry.build_chain(&config.middleware_order)?;

        let cancel = CancellationToken::new();
        let (cache, sweeper) = if enabled("cache") {
            let handle = cache.spawn_sweeper(cancel.child_token());
            (Some(cache), Some(handle))
        } else {
            (None, None)
        };

        info!(middlewares = ?chain.names(), "Storage pipeline ready");

        Ok(Self {
            chain,
            registry,
            queue,
            cache,
            callbacks: Vec::new(),
            cancel,
            sweeper: Mutex::new(sweeper),
        })
    }

    pub fn with_metadata_callback(mut self, callback: Arc<dyn MetadataCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Run a request through the chain, returning the raw response.
    pub async fn execute(&self, request: StorageRequest) -> StorageResponse {
        let ctx = RequestContext::new();
        let operation = request.operation;
        let file_name = request.file_name.clone();
        let entity = (request.entity_type.clone(), request.entity_id.clone());
        let user_id = request.user_id.clone();

        let response = self.chain.process(&ctx, request).await;

        if operation == Operation::Upload && response.success && !self.callbacks.is_empty() {
            let metadata = FileMetadata {
                id: Uuid::new_v4(),
                file_name,
                file_key: response.file_key.clone(),
                file_size: response.size,
                content_type: response.content_type.clone(),
                entity_type: entity.0,
                entity_id: entity.1,
                uploaded_by: user_id,
                uploaded_at: ctx.received_at,
                artifacts: response.artifacts.snapshot(),
                version: METADATA_VERSION,
            };
            self.notify(&metadata).await;
        }

        response
    }

    /// Run a request and turn a failed response into its error.
    pub async fn process(&self, request: StorageRequest) -> Result<StorageResponse, PipelineError> {
        self.execute(request).await.into_result()
    }

    async fn notify(&self, metadata: &FileMetadata) {
        for callback in &self.callbacks {
            if let Err(e) = callback.on_uploaded(metadata).await {
                warn!(file_key = %metadata.file_key, error = %e, "Metadata callback failed");
            }
        }
    }

    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn queue(&self) -> Option<&Arc<JobQueue>> {
        self.queue.as_ref()
    }

    pub fn cache(&self) -> Option<&Arc<CacheMiddleware>> {
        self.cache.as_ref()
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            cache: self.cache.as_ref().map(|c| c.stats()),
            queue: self.queue.as_ref().map(|q| q.stats()),
        }
    }

    /// Stop the cache sweeper and drain the thumbnail workers.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cache sweeper ended abnormally");
            }
        }
        if let Some(queue) = &self.queue {
            queue.shutdown().await;
        }
    }
}

impl Drop for StorageService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
