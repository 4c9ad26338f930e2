//! Read-through cache for downloads and previews.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::keys;
use crate::pipeline::{
    Middleware, Next, Operation, RequestContext, StorageRequest, StorageResponse,
};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub download_ttl: Duration,
    pub preview_ttl: Duration,
    /// Zero disables caching.
    pub max_entries: usize,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            download_ttl: Duration::from_secs(300),
            preview_ttl: Duration::from_secs(3600),
            max_entries: 1000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct CacheEntry {
    value: StorageResponse,
    file_key: String,
    expires_at: Instant,
    created_at: Instant,
    access_count: AtomicU64,
    /// Nanoseconds since the cache's epoch.
    last_accessed_at: AtomicU64,
}

type EntryMap = HashMap<String, CacheEntry>;

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Memoizes successful reads keyed by a hash of the request attributes.
///
/// A single `RwLock` guards the map. Hits only take the read lock because
/// access statistics are atomics; inserts, evictions and sweeps take the
/// write lock. The lock is never held across an await, so a miss racing
/// another miss for the same key simply computes the response twice.
pub struct CacheMiddleware {
    config: CacheConfig,
    /// Artifact labels whose derived keys are invalidated with a deleted original.
    derived_labels: Vec<String>,
    entries: Arc<RwLock<EntryMap>>,
    epoch: Instant,
    counters: Counters,
}

impl CacheMiddleware {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            derived_labels: Vec::new(),
            entries: Arc::new(RwLock::new(HashMap::new())),
            epoch: Instant::now(),
            counters: Counters::default(),
        }
    }

    pub fn with_derived_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.derived_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Hash over operation, key, caller, content type, category and range.
    pub fn cache_key(request: &StorageRequest) -> String {
        keys::fingerprint(&[
            request.operation.as_str(),
            &request.file_key,
            &request.user_id,
            &request.payload.content_type,
            &request.category,
            request.range.as_deref().unwrap_or(""),
        ])
    }

    fn ttl_for(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Preview => self.config.preview_ttl,
            _ => self.config.download_ttl,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, EntryMap> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntryMap> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn lookup(&self, key: &str) -> Option<StorageResponse> {
        let entries = self.read();
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        entry.access_count.fetch_add(1, Ordering::Relaxed);
        entry
            .last_accessed_at
            .store(self.now_nanos(), Ordering::Relaxed);
        Some(entry.value.clone())
    }

    fn insert(&self, key: String, file_key: String, value: StorageResponse, ttl: Duration) {
        if self.config.max_entries == 0 {
            return;
        }
        let now = Instant::now();
        let mut entries = self.write();

        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed_at.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            if let Some(evicted) = victim.and_then(|k| entries.remove(&k)) {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    file_key = %evicted.file_key,
                    age_ms = evicted.created_at.elapsed().as_millis() as u64,
                    hits = evicted.access_count.load(Ordering::Relaxed),
                    "Evicted least recently used cache entry"
                );
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                file_key,
                expires_at: now + ttl,
                created_at: now,
                access_count: AtomicU64::new(0),
                last_accessed_at: AtomicU64::new(self.now_nanos()),
            },
        );
    }

    /// Drop every entry for `file_key`.
    pub fn invalidate(&self, file_key: &str) -> usize {
        self.invalidate_all(&[file_key.to_string()])
    }

    /// Drop every entry for `file_key` and for its derived artifact keys.
    pub fn invalidate_with_artifacts(&self, file_key: &str) -> usize {
        let mut targets = Vec::with_capacity(self.derived_labels.len() + 1);
        targets.push(file_key.to_string());
        targets.extend(
            self.derived_labels
                .iter()
                .map(|label| keys::thumbnail_key(file_key, label)),
        );
        self.invalidate_all(&targets)
    }

    fn invalidate_all(&self, file_keys: &[String]) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| !file_keys.contains(&e.file_key));
        before - entries.len()
    }

    /// Remove expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge_expired(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Periodically purge expired entries until `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let entries = Arc::clone(&self.entries);
        let period = self.config.sweep_interval.max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = purge_expired(&entries);
                        if removed > 0 {
                            debug!(removed, "Purged expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

fn purge_expired(entries: &RwLock<EntryMap>) -> usize {
    let now = Instant::now();
    let mut entries = entries.write().unwrap_or_else(PoisonError::into_inner);
    let before = entries.len();
    entries.retain(|_, e| e.expires_at > now);
    before - entries.len()
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        request: StorageRequest,
        next: Next<'_>,
    ) -> StorageResponse {
        let operation = request.operation;
        if !operation.is_idempotent_read() {
            let response = next.run(ctx, request).await;
            if response.success && !response.file_key.is_empty() {
                match operation {
                    Operation::Delete => self.invalidate_with_artifacts(&response.file_key),
                    _ => self.invalidate(&response.file_key),
                };
            }
            return response;
        }

        let key = Self::cache_key(&request);
        if let Some(hit) = self.lookup(&key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(operation = %operation, file_key = %hit.file_key, "Cache hit");
            return hit;
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let file_key = request.file_key.clone();
        let response = next.run(ctx, request).await;
        if response.success {
            self.insert(key, file_key, response.clone(), self.ttl_for(operation));
        }
        response
    }
}
