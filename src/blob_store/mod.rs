mod gcs;
mod local;
mod memory;

pub use gcs::GcsStore;
pub use local::LocalStore;
pub use memory::MemoryStore;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// HTTP verb a presigned URL is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignVerb {
    Get,
    Put,
    Delete,
}

impl PresignVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresignVerb::Get => "GET",
            PresignVerb::Put => "PUT",
            PresignVerb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for PresignVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object body returned by [`BlobStore::get`].
#[derive(Debug, Clone)]
pub struct BlobObject {
    pub data: Bytes,
    pub size: u64,
    pub content_type: String,
}

/// Object attributes returned by [`BlobStore::stat`].
#[derive(Debug, Clone)]
pub struct BlobInfo {
    pub size: u64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
}

/// Abstraction over object storage backends.
///
/// Objects are addressed by `(bucket, key)`. Keys are canonical storage paths
/// produced by [`crate::keys`], so no secondary index is needed to find an
/// object. Implementations must be safe for concurrent use.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        size: u64,
        content_type: &str,
        user_metadata: &HashMap<String, String>,
    ) -> Result<(), BlobStoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<BlobObject, BlobStoreError>;

    /// Returns [`BlobStoreError::NotFound`] when the object does not exist.
    async fn stat(&self, bucket: &str, key: &str) -> Result<BlobInfo, BlobStoreError>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError>;

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        verb: PresignVerb,
    ) -> Result<String, BlobStoreError>;
}
