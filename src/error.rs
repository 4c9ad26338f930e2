use serde::Serialize;
use thiserror::Error;

use crate::blob_store::BlobStoreError;

/// Classification of every failure a pipeline call can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("not found")]
    NotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("invalid input")]
    InvalidInput,
    #[error("queue full")]
    QueueFull,
    #[error("upstream failure")]
    UpstreamFailure,
    /// Retryable failure, used by the thumbnail job queue.
    #[error("transient failure")]
    TransientFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AccessDenied, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn queue_full(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueueFull, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamFailure, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientFailure, message)
    }
}

impl From<BlobStoreError> for PipelineError {
    fn from(e: BlobStoreError) -> Self {
        match e {
            BlobStoreError::NotFound(key) => {
                PipelineError::not_found(format!("Object not found: {key}"))
            }
            other => PipelineError::upstream(other.to_string()),
        }
    }
}
