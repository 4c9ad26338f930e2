use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{BlobInfo, BlobObject, BlobStore, BlobStoreError, PresignVerb};

struct StoredObject {
    data: Bytes,
    content_type: String,
    user_metadata: HashMap<String, String>,
    last_modified: DateTime<Utc>,
}

/// In-process blob store. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects across all buckets.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .read()
            .await
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub async fn user_metadata(&self, bucket: &str, key: &str) -> Option<HashMap<String, String>> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.user_metadata.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        _size: u64,
        content_type: &str,
        user_metadata: &HashMap<String, String>,
    ) -> Result<(), BlobStoreError> {
        let object = StoredObject {
            data,
            content_type: content_type.to_string(),
            user_metadata: user_metadata.clone(),
            last_modified: Utc::now(),
        };
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), object);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<BlobObject, BlobStoreError> {
        let objects = self.objects.read().await;
        let object = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| BlobStoreError::NotFound(key.to_string()))?;
        Ok(BlobObject {
            data: object.data.clone(),
            size: object.data.len() as u64,
            content_type: object.content_type.clone(),
        })
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<BlobInfo, BlobStoreError> {
        let objects = self.objects.read().await;
        let object = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| BlobStoreError::NotFound(key.to_string()))?;
        Ok(BlobInfo {
            size: object.data.len() as u64,
            content_type: object.content_type.clone(),
            last_modified: object.last_modified,
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError> {
        self.objects
            .write()
            .await
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        verb: PresignVerb,
    ) -> Result<String, BlobStoreError> {
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("memory://{bucket}/{key}?verb={verb}&expires={expires}"))
    }
}
