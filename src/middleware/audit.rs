use std::time::Instant;

use async_trait::async_trait;

use crate::pipeline::{Middleware, Next, RequestContext, StorageRequest, StorageResponse};

/// Records every operation and its outcome under the `audit` log target.
#[derive(Default)]
pub struct AuditMiddleware;

#[async_trait]
impl Middleware for AuditMiddleware {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        request: StorageRequest,
        next: Next<'_>,
    ) -> StorageResponse {
        let operation = request.operation;
        let user_id = request.user_id.clone();
        let entity = format!("{}/{}", request.entity_type, request.entity_id);
        let started = Instant::now();

        let response = next.run(ctx, request).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &response.error {
            None => tracing::info!(
                target: "audit",
                request_id = %ctx.request_id,
                operation = %operation,
                file_key = %response.file_key,
                user_id = %user_id,
                entity = %entity,
                size = response.size,
                elapsed_ms,
                "storage operation succeeded"
            ),
            Some(e) => tracing::warn!(
                target: "audit",
                request_id = %ctx.request_id,
                operation = %operation,
                file_key = %response.file_key,
                user_id = %user_id,
                entity = %entity,
                error_kind = %e.kind,
                error = %e.message,
                elapsed_ms,
                "storage operation failed"
            ),
        }

        response
    }
}
