//! Derived-artifact (thumbnail) generation: image resizing, the background
//! job queue and its worker pool.

pub mod generator;
mod job;
mod processor;
mod queue;

pub use generator::{OutputFormat, RenderedImage, ThumbnailSize, DEFAULT_JPEG_QUALITY};
pub use job::{ArtifactCallback, DerivedArtifactJob, JobEvent, JobId, JobStatus};
pub use processor::ThumbnailRenderer;
pub use queue::{JobProcessor, JobQueue, JobQueueConfig, QueueStats};
