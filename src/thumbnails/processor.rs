use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::generator::{self, OutputFormat, RenderedImage, ThumbnailSize};
use super::job::DerivedArtifactJob;
use super::queue::JobProcessor;
use crate::blob_store::BlobStore;
use crate::error::PipelineError;
use crate::keys;
use crate::pipeline::ArtifactInfo;

/// Renders artifacts for an original image and stores them under their
/// derived keys. Used by queue workers and by the synchronous upload path.
pub struct ThumbnailRenderer {
    store: Arc<dyn BlobStore>,
    jpeg_quality: u8,
}

impl ThumbnailRenderer {
    pub fn new(store: Arc<dyn BlobStore>, jpeg_quality: u8) -> Self {
        Self {
            store,
            jpeg_quality,
        }
    }

    /// Generate and upload every size. The source is decoded once.
    pub async fn render_all(
        &self,
        bucket: &str,
        source_key: &str,
        source: Bytes,
        sizes: &[ThumbnailSize],
    ) -> Result<Vec<ArtifactInfo>, PipelineError> {
        let targets: Vec<(ThumbnailSize, String, OutputFormat)> = sizes
            .iter()
            .map(|size| {
                let key = keys::thumbnail_key(source_key, &size.label);
                let format = OutputFormat::for_key(&key, self.jpeg_quality);
                (size.clone(), key, format)
            })
            .collect();

        let rendered = tokio::task::spawn_blocking(move || {
            let img = generator::decode(&source)?;
            targets
                .into_iter()
                .map(|(size, key, format)| {
                    generator::render_image(&img, &size, format).map(|r| (size, key, r))
                })
                .collect::<Result<Vec<_>, PipelineError>>()
        })
        .await
        .map_err(|e| PipelineError::transient(format!("Thumbnail render task failed: {e}")))??;

        let mut artifacts = Vec::with_capacity(rendered.len());
        for (size, key, image) in rendered {
            artifacts.push(self.store_artifact(bucket, source_key, &size, key, image).await?);
        }
        Ok(artifacts)
    }

    async fn store_artifact(
        &self,
        bucket: &str,
        source_key: &str,
        size: &ThumbnailSize,
        key: String,
        image: RenderedImage,
    ) -> Result<ArtifactInfo, PipelineError> {
        let byte_size = image.data.len() as u64;
        let metadata = HashMap::from([
            ("source-key".to_string(), source_key.to_string()),
            ("artifact-label".to_string(), size.label.clone()),
        ]);

        self.store
            .put(bucket, &key, image.data, byte_size, image.content_type, &metadata)
            .await?;

        tracing::debug!(
            file_key = %key,
            width = image.width,
            height = image.height,
            byte_size,
            "Stored thumbnail"
        );

        Ok(ArtifactInfo {
            label: size.label.clone(),
            key,
            width: image.width,
            height: image.height,
            byte_size,
        })
    }
}

#[async_trait]
impl JobProcessor for ThumbnailRenderer {
    async fn process(&self, job: &DerivedArtifactJob) -> Result<Vec<ArtifactInfo>, PipelineError> {
        if !job.content_type.is_empty() && !generator::can_decode(&job.content_type) {
            return Err(PipelineError::invalid_input(format!(
                "Cannot derive artifacts from '{}'",
                job.content_type
            )));
        }
        let source = match &job.payload {
            Some(payload) => payload.clone(),
            None => self.store.get(&job.bucket, &job.source_key).await?.data,
        };
        self.render_all(&job.bucket, &job.source_key, source, &job.sizes)
            .await
    }
}
