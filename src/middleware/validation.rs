use async_trait::async_trait;

use crate::error::PipelineError;
use crate::pipeline::{
    Middleware, Next, Operation, RequestContext, StorageRequest, StorageResponse,
};

/// Rejects malformed requests before they reach the store.
pub struct ValidationMiddleware {
    max_upload_size: u64,
    /// Exact types or `type/*` wildcards. Empty allows everything.
    allowed_content_types: Vec<String>,
}

impl ValidationMiddleware {
    pub fn new(max_upload_size: u64, allowed_content_types: Vec<String>) -> Self {
        Self {
            max_upload_size,
            allowed_content_types,
        }
    }

    pub fn validate(&self, request: &StorageRequest) -> Result<(), PipelineError> {
        match request.operation {
            Operation::Upload => self.validate_upload(request),
            Operation::Download | Operation::Delete | Operation::Preview => {
                validate_key(&request.file_key)
            }
        }
    }

    fn validate_upload(&self, request: &StorageRequest) -> Result<(), PipelineError> {
        for (field, value) in [
            ("entity_type", &request.entity_type),
            ("entity_id", &request.entity_id),
            ("category", &request.category),
        ] {
            validate_segment(field, value)?;
        }
        if !request.file_key.is_empty() {
            validate_key(&request.file_key)?;
        }

        let payload = &request.payload;
        let actual = payload.data.len() as u64;
        if actual == 0 {
            return Err(PipelineError::invalid_input("Upload payload is empty"));
        }
        if payload.size != actual {
            return Err(PipelineError::invalid_input(format!(
                "Declared size {} does not match payload size {actual}",
                payload.size
            )));
        }
        if actual > self.max_upload_size {
            return Err(PipelineError::invalid_input(format!(
                "File exceeds maximum upload size of {} bytes",
                self.max_upload_size
            )));
        }
        if !self.content_type_allowed(&payload.content_type) {
            return Err(PipelineError::invalid_input(format!(
                "Content type '{}' is not allowed",
                payload.content_type
            )));
        }
        Ok(())
    }

    fn content_type_allowed(&self, content_type: &str) -> bool {
        if self.allowed_content_types.is_empty() {
            return true;
        }
        let content_type = essence(content_type);
        self.allowed_content_types.iter().any(|allowed| {
            match allowed.strip_suffix("/*") {
                Some("*") => true,
                Some(primary) => content_type
                    .split_once('/')
                    .is_some_and(|(p, _)| p.eq_ignore_ascii_case(primary)),
                None => allowed.eq_ignore_ascii_case(content_type),
            }
        })
    }
}

/// `image/png; charset=x` -> `image/png`
fn essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

fn validate_segment(field: &str, value: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::invalid_input(format!("{field} is required")));
    }
    if value.contains('/') || value == "." || value == ".." {
        return Err(PipelineError::invalid_input(format!(
            "{field} must be a single path segment"
        )));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), PipelineError> {
    if key.trim().is_empty() {
        return Err(PipelineError::invalid_input("file_key is required"));
    }
    if key.starts_with('/') || key.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
        return Err(PipelineError::invalid_input(format!(
            "Invalid file key: {key}"
        )));
    }
    Ok(())
}

#[async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        request: StorageRequest,
        next: Next<'_>,
    ) -> StorageResponse {
        if let Err(e) = self.validate(&request) {
            tracing::debug!(operation = %request.operation, error = %e, "Request rejected");
            return StorageResponse::failure(e).with_file_key(request.file_key);
        }
        next.run(ctx, request).await
    }
}
