use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blob_pipeline::error::PipelineError;
use blob_pipeline::keys;
use blob_pipeline::middleware::{CacheConfig, CacheMiddleware};
use blob_pipeline::pipeline::{
    MiddlewareChain, RequestContext, StorageRequest, StorageResponse, Terminal,
};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Serves `body:{key}` and counts how often it is reached.
#[derive(Default)]
struct CountingTerminal {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingTerminal {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Terminal for CountingTerminal {
    async fn execute(&self, _ctx: &RequestContext, request: StorageRequest) -> StorageResponse {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return StorageResponse::failure(PipelineError::upstream("store unavailable"));
        }
        StorageResponse {
            data: Some(Bytes::from(format!("body:{}:{call}", request.file_key))),
            url: Some(format!("memory://files/{}", request.file_key)),
            ..StorageResponse::ok().with_file_key(request.file_key)
        }
    }
}

fn setup(config: CacheConfig) -> (MiddlewareChain, Arc<CacheMiddleware>, Arc<CountingTerminal>) {
    let terminal = Arc::new(CountingTerminal::default());
    let cache = Arc::new(CacheMiddleware::new(config));
    let mut chain = MiddlewareChain::with_terminal(terminal.clone());
    chain.add(cache.clone());
    (chain, cache, terminal)
}

fn short_ttl(max_entries: usize) -> CacheConfig {
    CacheConfig {
        download_ttl: Duration::from_millis(50),
        preview_ttl: Duration::from_secs(60),
        max_entries,
        sweep_interval: Duration::from_millis(10),
    }
}

async fn run(chain: &MiddlewareChain, request: StorageRequest) -> StorageResponse {
    chain.process(&RequestContext::new(), request).await
}

fn download(key: &str) -> StorageRequest {
    StorageRequest::download(key).with_user("alice")
}

#[tokio::test]
async fn test_hit_skips_terminal_and_returns_identical_bytes() {
    let (chain, cache, terminal) = setup(CacheConfig::default());

    let first = run(&chain, download("a/b/c/1_x.txt")).await;
    let second = run(&chain, download("a/b/c/1_x.txt")).await;

    assert_eq!(terminal.calls(), 1);
    assert!(second.success);
    assert_eq!(first.data, second.data);

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
}

#[tokio::test]
async fn test_key_covers_caller_and_range() {
    let (chain, cache, terminal) = setup(CacheConfig::default());

    run(&chain, download("k")).await;
    run(&chain, StorageRequest::download("k").with_user("bob")).await;
    run(&chain, download("k").with_range("bytes=0-1")).await;
    run(&chain, download("k").with_range("bytes=2-3")).await;
    run(&chain, StorageRequest::preview("k").with_user("alice")).await;

    assert_eq!(terminal.calls(), 5);
    assert_eq!(cache.len(), 5);
}

#[tokio::test]
async fn test_expired_entry_reinvokes_terminal() {
    let (chain, _cache, terminal) = setup(short_ttl(10));

    run(&chain, download("k")).await;
    run(&chain, download("k")).await;
    assert_eq!(terminal.calls(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let refreshed = run(&chain, download("k")).await;

    assert_eq!(terminal.calls(), 2);
    assert_eq!(refreshed.data, Some(Bytes::from("body:k:1")));
}

#[tokio::test]
async fn test_failures_are_never_cached() {
    let (chain, cache, terminal) = setup(CacheConfig::default());
    terminal.failing.store(true, Ordering::SeqCst);

    assert!(!run(&chain, download("k")).await.success);
    assert!(!run(&chain, download("k")).await.success);

    assert_eq!(terminal.calls(), 2);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_full_cache_evicts_least_recently_accessed() {
    let (chain, cache, terminal) = setup(CacheConfig {
        max_entries: 2,
        ..CacheConfig::default()
    });

    run(&chain, download("a")).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    run(&chain, download("b")).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    // Touch "a" so "b" becomes the oldest
    run(&chain, download("a")).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    run(&chain, download("c")).await;

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(terminal.calls(), 3);

    run(&chain, download("a")).await;
    assert_eq!(terminal.calls(), 3);
    run(&chain, download("b")).await;
    assert_eq!(terminal.calls(), 4);
}

#[tokio::test]
async fn test_delete_invalidates_cached_reads() {
    let (chain, cache, terminal) = setup(CacheConfig::default());

    run(&chain, download("k")).await;
    run(&chain, StorageRequest::preview("k").with_user("alice")).await;
    assert_eq!(cache.len(), 2);

    let deleted = run(&chain, StorageRequest::delete("k").with_user("alice")).await;
    assert!(deleted.success);
    assert!(cache.is_empty());

    run(&chain, download("k")).await;
    assert_eq!(terminal.calls(), 4);
}

#[tokio::test]
async fn test_delete_invalidates_derived_artifact_reads() {
    let terminal = Arc::new(CountingTerminal::default());
    let cache = Arc::new(
        CacheMiddleware::new(CacheConfig::default()).with_derived_labels(["150x150", "300x300"]),
    );
    let mut chain = MiddlewareChain::with_terminal(terminal.clone());
    chain.add(cache.clone());

    let original = "users/1/avatars/1_a.jpg";
    let thumb = keys::thumbnail_key(original, "150x150");
    run(&chain, download(&thumb)).await;
    run(&chain, StorageRequest::preview(&thumb).with_user("alice")).await;
    run(&chain, download("users/1/avatars/2_b.jpg")).await;
    assert_eq!(cache.len(), 3);

    run(&chain, StorageRequest::delete(original).with_user("alice")).await;
    assert_eq!(cache.len(), 1);

    run(&chain, download(&thumb)).await;
    run(&chain, download("users/1/avatars/2_b.jpg")).await;
    // Delete plus the re-fetched thumbnail; the unrelated entry still hits.
    assert_eq!(terminal.calls(), 5);
}

#[tokio::test]
async fn test_sweeper_purges_expired_entries_until_cancelled() {
    let (chain, cache, _terminal) = setup(short_ttl(10));
    let cancel = CancellationToken::new();
    let sweeper = cache.spawn_sweeper(cancel.clone());

    run(&chain, download("a")).await;
    run(&chain, download("b")).await;
    assert_eq!(cache.len(), 2);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(cache.is_empty());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
