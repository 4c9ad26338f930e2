use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::generator::ThumbnailSize;
use crate::pipeline::ArtifactInfo;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Invoked once per generated artifact when a job completes.
pub type ArtifactCallback = Arc<dyn Fn(&ArtifactInfo) + Send + Sync>;

/// A request to derive resized variants of one stored image.
///
/// Owned by the job queue from submission until it completes, fails or is
/// discarded; only one worker holds it at a time.
pub struct DerivedArtifactJob {
    /// Assigned on submission when absent.
    pub id: Option<JobId>,
    pub source_key: String,
    /// Original bytes, when the submitter still holds them. Otherwise the
    /// worker fetches `source_key` from the store.
    pub payload: Option<Bytes>,
    pub sizes: Vec<ThumbnailSize>,
    pub bucket: String,
    /// Content type of the original. Empty skips the decodability check.
    pub content_type: String,
    pub callback: Option<ArtifactCallback>,
    /// Assigned on submission when absent.
    pub created_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl DerivedArtifactJob {
    pub fn new(
        source_key: impl Into<String>,
        bucket: impl Into<String>,
        sizes: Vec<ThumbnailSize>,
    ) -> Self {
        Self {
            id: None,
            source_key: source_key.into(),
            payload: None,
            sizes,
            bucket: bucket.into(),
            content_type: String::new(),
            callback: None,
            created_at: None,
            retry_count: 0,
        }
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_callback(mut self, callback: ArtifactCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn labels(&self) -> Vec<&str> {
        self.sizes.iter().map(|s| s.label.as_str()).collect()
    }
}

impl fmt::Debug for DerivedArtifactJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedArtifactJob")
            .field("id", &self.id)
            .field("source_key", &self.source_key)
            .field("payload_len", &self.payload.as_ref().map(Bytes::len))
            .field("labels", &self.labels())
            .field("bucket", &self.bucket)
            .field("content_type", &self.content_type)
            .field("has_callback", &self.callback.is_some())
            .field("created_at", &self.created_at)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

/// Lifecycle: `Queued → Processing → Completed | Retrying → Queued | Failed`.
/// Jobs still queued at shutdown end as `Discarded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Retrying,
    Completed,
    Failed,
    Discarded,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Discarded
        )
    }
}

/// State transition broadcast by the job queue.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: JobId,
    pub source_key: String,
    pub status: JobStatus,
    pub retry_count: u32,
    pub error: Option<String>,
}
