//! Shared test helpers for blob-pipeline unit tests.

use std::sync::Arc;
use std::time::Duration;

use crate::blob_store::MemoryStore;
use crate::config::{Config, StorageBackend, StorageConfig};
use crate::service::StorageService;
use crate::AppState;

/// Configuration for tests: in-memory store, synchronous thumbnails.
pub fn test_config() -> Config {
    let mut config = Config {
        max_upload_size: 10 * 1024 * 1024, // 10MB for tests
        storage: StorageConfig {
            backend: StorageBackend::Memory,
            presign_ttl: Duration::from_secs(60),
            ..StorageConfig::default()
        },
        ..Config::default()
    };
    config.thumbnails.async_enabled = false;
    config
}

/// Create a test AppState backed by a fresh in-memory store.
pub fn test_state() -> (Arc<AppState>, Arc<MemoryStore>) {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let service =
        StorageService::start(&config, store.clone()).expect("Failed to start test service");

    let state = Arc::new(AppState {
        config,
        service,
        local_store: None,
    });
    (state, store)
}
