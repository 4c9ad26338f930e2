use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::chain::Terminal;
use super::request::{Operation, RequestContext, StorageRequest, StorageResponse};
use crate::blob_store::{BlobStore, PresignVerb};
use crate::error::PipelineError;
use crate::keys::{self, BucketStrategy};
use crate::range::parse_range;

/// Terminal that executes the operation against the blob store.
pub struct BlobTerminal {
    store: Arc<dyn BlobStore>,
    buckets: BucketStrategy,
    presign_ttl: Duration,
}

impl BlobTerminal {
    pub fn new(store: Arc<dyn BlobStore>, buckets: BucketStrategy, presign_ttl: Duration) -> Self {
        Self {
            store,
            buckets,
            presign_ttl,
        }
    }

    async fn upload(&self, mut request: StorageRequest) -> Result<StorageResponse, PipelineError> {
        if request.file_key.is_empty() {
            let key = keys::new_canonical_key(
                &request.entity_type,
                &request.entity_id,
                &request.category,
                &request.file_name,
                &request.payload.content_type,
            );
            request.assign_file_key(key);
        }

        let bucket = self.buckets.bucket_for(&request.category);
        let size = request.payload.data.len() as u64;
        self.store
            .put(
                &bucket,
                &request.file_key,
                request.payload.data,
                size,
                &request.payload.content_type,
                &request.metadata,
            )
            .await?;

        tracing::debug!(file_key = %request.file_key, bucket = %bucket, size, "Stored object");

        Ok(StorageResponse {
            size,
            content_type: request.payload.content_type,
            metadata: request.metadata,
            ..StorageResponse::ok().with_file_key(request.file_key)
        })
    }

    async fn download(&self, request: StorageRequest) -> Result<StorageResponse, PipelineError> {
        let bucket = self.bucket_of(&request);
        let object = self.store.get(&bucket, &request.file_key).await?;

        let (data, range) = match request.range.as_deref() {
            Some(header) => {
                let range = parse_range(header, object.size)?;
                let data = object
                    .data
                    .slice(range.start as usize..=range.end as usize);
                (data, Some(range))
            }
            None => (object.data, None),
        };

        Ok(StorageResponse {
            size: object.size,
            content_type: object.content_type,
            data: Some(data),
            range,
            ..StorageResponse::ok().with_file_key(request.file_key)
        })
    }

    async fn delete(&self, request: StorageRequest) -> Result<StorageResponse, PipelineError> {
        let bucket = self.bucket_of(&request);
        self.store.delete(&bucket, &request.file_key).await?;
        tracing::debug!(file_key = %request.file_key, bucket = %bucket, "Deleted object");
        Ok(StorageResponse::ok().with_file_key(request.file_key))
    }

    async fn preview(&self, request: StorageRequest) -> Result<StorageResponse, PipelineError> {
        let bucket = self.bucket_of(&request);
        let info = self.store.stat(&bucket, &request.file_key).await?;
        let url = self
            .store
            .presign(&bucket, &request.file_key, self.presign_ttl, PresignVerb::Get)
            .await?;

        Ok(StorageResponse {
            size: info.size,
            content_type: info.content_type,
            url: Some(url),
            ..StorageResponse::ok().with_file_key(request.file_key)
        })
    }

    fn bucket_of(&self, request: &StorageRequest) -> String {
        self.buckets
            .bucket_for_key(&request.category, &request.file_key)
    }
}

#[async_trait]
impl Terminal for BlobTerminal {
    async fn execute(&self, _ctx: &RequestContext, request: StorageRequest) -> StorageResponse {
        let file_key = request.file_key.clone();
        let result = match request.operation {
            Operation::Upload => self.upload(request).await,
            Operation::Download => self.download(request).await,
            Operation::Delete => self.delete(request).await,
            Operation::Preview => self.preview(request).await,
        };
        result.unwrap_or_else(|e| StorageResponse::failure(e).with_file_key(file_key))
    }
}
