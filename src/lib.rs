//! blob-pipeline - a middleware pipeline in front of object blob storage
//!
//! Every storage operation (upload, download, delete, preview) flows through
//! an ordered chain of cross-cutting behaviors before reaching the store:
//! - Swappable blob store backends (local filesystem, GCS, in-memory)
//! - Access control, validation, audit logging and an encryption hook
//! - Thumbnail generation on a bounded background worker pool with retry
//! - Read-through TTL + LRU cache for downloads and previews
//! - REST API with multipart upload and range downloads

pub mod api;
pub mod blob_store;
pub mod config;
pub mod error;
pub mod keys;
pub mod middleware;
pub mod pipeline;
pub mod range;
pub mod registry;
pub mod service;
#[cfg(test)]
pub mod testutil;
pub mod thumbnails;

use std::sync::Arc;

use blob_store::LocalStore;
use config::Config;
use service::StorageService;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub service: StorageService,
    /// Set when the local backend serves its own presigned links.
    pub local_store: Option<Arc<LocalStore>>,
}
