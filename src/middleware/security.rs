use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::pipeline::{Middleware, Next, RequestContext, StorageRequest, StorageResponse};

/// Decides whether a request may proceed. Policy semantics belong to the
/// implementor; the middleware only enforces the verdict.
pub trait AccessPolicy: Send + Sync {
    fn authorize(&self, request: &StorageRequest) -> Result<(), PipelineError>;
}

/// Admits any request that carries a caller identity.
pub struct RequireIdentity;

impl AccessPolicy for RequireIdentity {
    fn authorize(&self, request: &StorageRequest) -> Result<(), PipelineError> {
        if request.user_id.trim().is_empty() {
            return Err(PipelineError::access_denied(
                "A user identity is required for storage operations",
            ));
        }
        Ok(())
    }
}

/// Rejects unauthorized requests before anything else runs.
pub struct SecurityMiddleware {
    policy: Arc<dyn AccessPolicy>,
}

impl SecurityMiddleware {
    pub fn new(policy: Arc<dyn AccessPolicy>) -> Self {
        Self { policy }
    }
}

impl Default for SecurityMiddleware {
    fn default() -> Self {
        Self::new(Arc::new(RequireIdentity))
    }
}

#[async_trait]
impl Middleware for SecurityMiddleware {
    fn name(&self) -> &'static str {
        "security"
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        request: StorageRequest,
        next: Next<'_>,
    ) -> StorageResponse {
        if let Err(e) = self.policy.authorize(&request) {
            tracing::warn!(
                operation = %request.operation,
                file_key = %request.file_key,
                user_id = %request.user_id,
                error = %e,
                "Request denied"
            );
            return StorageResponse::failure(e).with_file_key(request.file_key);
        }
        next.run(ctx, request).await
    }
}
