use async_trait::async_trait;

use crate::pipeline::{Middleware, Next, RequestContext, StorageRequest, StorageResponse};

/// Placeholder for encryption at rest. Payloads pass through unchanged.
#[derive(Default)]
pub struct EncryptionMiddleware;

#[async_trait]
impl Middleware for EncryptionMiddleware {
    fn name(&self) -> &'static str {
        "encryption"
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        request: StorageRequest,
        next: Next<'_>,
    ) -> StorageResponse {
        tracing::trace!(operation = %request.operation, "Encryption at rest not implemented, passing through");
        next.run(ctx, request).await
    }
}
