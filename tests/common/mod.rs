//! Shared helpers for blob-pipeline integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blob_pipeline::blob_store::{
    BlobInfo, BlobObject, BlobStore, BlobStoreError, MemoryStore, PresignVerb,
};
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// Wraps a [`MemoryStore`], counting calls and optionally failing the first
/// few `get`s.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub puts: AtomicUsize,
    pub gets: AtomicUsize,
    pub stats: AtomicUsize,
    pub deletes: AtomicUsize,
    fail_gets: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` calls to `get` fail with a backend error.
    pub fn fail_next_gets(&self, n: usize) {
        self.fail_gets.store(n, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> usize {
        self.stats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for CountingStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        size: u64,
        content_type: &str,
        user_metadata: &HashMap<String, String>,
    ) -> Result<(), BlobStoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner
            .put(bucket, key, data, size, content_type, user_metadata)
            .await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<BlobObject, BlobStoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .fail_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(BlobStoreError::Backend("injected failure".into()));
        }
        self.inner.get(bucket, key).await
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<BlobInfo, BlobStoreError> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        self.inner.stat(bucket, key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(bucket, key).await
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        verb: PresignVerb,
    ) -> Result<String, BlobStoreError> {
        self.inner.presign(bucket, key, ttl, verb).await
    }
}

/// A solid-color image encoded in `format`.
pub fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Bytes {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 80, 40])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format)
        .expect("encode test image");
    Bytes::from(buf)
}

pub fn jpeg(width: u32, height: u32) -> Bytes {
    encoded_image(width, height, ImageFormat::Jpeg)
}

pub fn png(width: u32, height: u32) -> Bytes {
    encoded_image(width, height, ImageFormat::Png)
}
