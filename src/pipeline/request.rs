use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::PipelineError;
use crate::range::ByteRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Upload,
    Download,
    Delete,
    Preview,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
            Operation::Delete => "delete",
            Operation::Preview => "preview",
        }
    }

    /// Reads that may be served from cache.
    pub fn is_idempotent_read(&self) -> bool {
        matches!(self, Operation::Download | Operation::Preview)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload body. `size` is the size the caller declared.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub data: Bytes,
    pub size: u64,
    pub content_type: String,
}

impl Payload {
    pub fn new(data: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            size: data.len() as u64,
            data,
            content_type: content_type.into(),
        }
    }
}

/// Per-call context handed to every middleware.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            received_at: Utc::now(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One storage operation attempt.
#[derive(Debug, Clone)]
pub struct StorageRequest {
    pub operation: Operation,
    /// Empty until the terminal assigns one on upload; never reassigned.
    pub file_key: String,
    pub file_name: String,
    pub payload: Payload,
    pub category: String,
    pub entity_type: String,
    pub entity_id: String,
    pub user_id: String,
    /// Raw `Range` header for downloads.
    pub range: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl StorageRequest {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            file_key: String::new(),
            file_name: String::new(),
            payload: Payload::default(),
            category: String::new(),
            entity_type: String::new(),
            entity_id: String::new(),
            user_id: String::new(),
            range: None,
            metadata: HashMap::new(),
        }
    }

    pub fn upload(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        category: impl Into<String>,
        file_name: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            category: category.into(),
            file_name: file_name.into(),
            payload,
            ..Self::new(Operation::Upload)
        }
    }

    pub fn download(file_key: impl Into<String>) -> Self {
        Self::new(Operation::Download).with_file_key(file_key)
    }

    pub fn delete(file_key: impl Into<String>) -> Self {
        Self::new(Operation::Delete).with_file_key(file_key)
    }

    pub fn preview(file_key: impl Into<String>) -> Self {
        Self::new(Operation::Preview).with_file_key(file_key)
    }

    pub fn with_file_key(mut self, file_key: impl Into<String>) -> Self {
        self.assign_file_key(file_key);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    /// Set the key if none is assigned yet. Returns whether it was set.
    pub fn assign_file_key(&mut self, file_key: impl Into<String>) -> bool {
        if !self.file_key.is_empty() {
            return false;
        }
        self.file_key = file_key.into();
        true
    }
}

/// A derived artifact. `byte_size == 0` means generation has not finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub label: String,
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
}

impl ArtifactInfo {
    pub fn is_ready(&self) -> bool {
        self.byte_size > 0
    }
}

/// Ordered artifact list shared between a response and the background
/// workers that fill it in.
///
/// Clones observe the same list. Consumers that need completed artifacts
/// can [`subscribe`](Self::subscribe) and wait on the receiver.
#[derive(Clone)]
pub struct ArtifactSet {
    cell: Arc<watch::Sender<Vec<ArtifactInfo>>>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self { cell: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Vec<ArtifactInfo> {
        self.cell.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.cell.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell.borrow().is_empty()
    }

    pub fn replace(&self, artifacts: Vec<ArtifactInfo>) {
        self.cell.send_replace(artifacts);
    }

    /// Record a finished artifact, matched by label.
    pub fn complete(&self, finished: &ArtifactInfo) {
        self.cell.send_modify(|artifacts| {
            if let Some(slot) = artifacts.iter_mut().find(|a| a.label == finished.label) {
                *slot = finished.clone();
            }
        });
    }

    pub fn all_ready(&self) -> bool {
        self.cell.borrow().iter().all(ArtifactInfo::is_ready)
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ArtifactInfo>> {
        self.cell.subscribe()
    }
}

impl Default for ArtifactSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ArtifactSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.cell.borrow().iter()).finish()
    }
}

/// Result of a chain execution.
#[derive(Debug, Clone, Default)]
pub struct StorageResponse {
    pub success: bool,
    pub error: Option<PipelineError>,
    pub file_key: String,
    pub size: u64,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    /// Body of a download.
    pub data: Option<Bytes>,
    /// Presigned URL of a preview.
    pub url: Option<String>,
    /// Resolved range of a partial download.
    pub range: Option<ByteRange>,
    pub artifacts: ArtifactSet,
}

impl StorageResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(error: PipelineError) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_file_key(mut self, file_key: impl Into<String>) -> Self {
        self.file_key = file_key.into();
        self
    }

    pub fn into_result(self) -> Result<StorageResponse, PipelineError> {
        match (self.success, &self.error) {
            (true, _) => Ok(self),
            (false, Some(e)) => Err(e.clone()),
            (false, None) => Err(PipelineError::upstream("Operation failed without an error")),
        }
    }
}
