use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::blob_store::BlobStore;
use crate::keys::{self, BucketStrategy};
use crate::pipeline::{
    ArtifactInfo, Middleware, Next, Operation, RequestContext, StorageRequest, StorageResponse,
};
use crate::thumbnails::generator::can_decode;
use crate::thumbnails::{DerivedArtifactJob, JobQueue, ThumbnailRenderer, ThumbnailSize};

/// How artifacts are produced after a successful upload.
pub enum GenerationMode {
    /// Submit a job to the background queue and back-fill the response later.
    Async(Arc<JobQueue>),
    /// Render and store before the upload returns.
    Sync(Arc<ThumbnailRenderer>),
}

/// Attaches derived artifacts to image uploads and removes them on delete.
///
/// Artifact keys are derived from the stored key, so the response carries
/// every artifact address (with `byte_size == 0`) before generation has run.
pub struct ThumbnailMiddleware {
    sizes: Vec<ThumbnailSize>,
    buckets: BucketStrategy,
    store: Arc<dyn BlobStore>,
    mode: GenerationMode,
}

impl ThumbnailMiddleware {
    pub fn new(
        sizes: Vec<ThumbnailSize>,
        buckets: BucketStrategy,
        store: Arc<dyn BlobStore>,
        mode: GenerationMode,
    ) -> Self {
        Self {
            sizes,
            buckets,
            store,
            mode,
        }
    }

    fn placeholders(&self, file_key: &str) -> Vec<ArtifactInfo> {
        self.sizes
            .iter()
            .map(|size| ArtifactInfo {
                label: size.label.clone(),
                key: keys::thumbnail_key(file_key, &size.label),
                width: size.width,
                height: size.height,
                byte_size: 0,
            })
            .collect()
    }

    async fn upload(
        &self,
        ctx: &RequestContext,
        request: StorageRequest,
        next: Next<'_>,
    ) -> StorageResponse {
        let payload = request.payload.data.clone();
        let content_type = request.payload.content_type.clone();
        let category = request.category.clone();

        let response = next.run(ctx, request).await;
        if !response.success || response.file_key.is_empty() || self.sizes.is_empty() {
            return response;
        }

        response
            .artifacts
            .replace(self.placeholders(&response.file_key));
        let bucket = self.buckets.bucket_for(&category);

        match &self.mode {
            GenerationMode::Async(queue) => {
                let artifacts = response.artifacts.clone();
                let job = DerivedArtifactJob::new(&response.file_key, bucket, self.sizes.clone())
                    .with_content_type(content_type)
                    .with_callback(Arc::new(move |artifact: &ArtifactInfo| {
                        artifacts.complete(artifact)
                    }));
                match queue.submit(job) {
                    Ok(job_id) => {
                        debug!(job_id = %job_id, file_key = %response.file_key, "Submitted thumbnail job")
                    }
                    Err(e) => warn!(
                        file_key = %response.file_key,
                        error = %e,
                        "Thumbnail job not submitted, continuing without artifacts"
                    ),
                }
            }
            GenerationMode::Sync(renderer) => {
                match renderer
                    .render_all(&bucket, &response.file_key, payload, &self.sizes)
                    .await
                {
                    Ok(rendered) => {
                        for artifact in &rendered {
                            response.artifacts.complete(artifact);
                        }
                    }
                    Err(e) => warn!(
                        file_key = %response.file_key,
                        error = %e,
                        "Thumbnail generation failed, continuing without artifacts"
                    ),
                }
            }
        }

        response
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        request: StorageRequest,
        next: Next<'_>,
    ) -> StorageResponse {
        let file_key = request.file_key.clone();
        let category = request.category.clone();

        let response = next.run(ctx, request).await;
        let is_image = mime_guess::from_path(&file_key)
            .first()
            .is_some_and(|mime| can_decode(mime.essence_str()));
        if !response.success || !is_image {
            return response;
        }

        let bucket = self.buckets.bucket_for_key(&category, &file_key);
        for size in &self.sizes {
            let key = keys::thumbnail_key(&file_key, &size.label);
            if let Err(e) = self.store.delete(&bucket, &key).await {
                warn!(file_key = %key, error = %e, "Failed to delete thumbnail");
            }
        }

        response
    }
}

#[async_trait]
impl Middleware for ThumbnailMiddleware {
    fn name(&self) -> &'static str {
        "thumbnail"
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        request: StorageRequest,
        next: Next<'_>,
    ) -> StorageResponse {
        match request.operation {
            Operation::Upload if can_decode(&request.payload.content_type) => {
                self.upload(ctx, request, next).await
            }
            Operation::Delete => self.delete(ctx, request, next).await,
            _ => next.run(ctx, request).await,
        }
    }
}
