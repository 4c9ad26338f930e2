//! Bounded job queue drained by a fixed pool of thumbnail workers.
//!
//! Submission never blocks: a full queue is reported as
//! [`ErrorKind::QueueFull`](crate::error::ErrorKind::QueueFull) so the caller
//! can carry on without derived artifacts. Failed jobs are re-enqueued after a
//! fixed delay until the retry budget is spent, then dropped with an error log.
//! On shutdown, workers finish their current job and jobs still waiting in the
//! queue are discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::job::{DerivedArtifactJob, JobEvent, JobId, JobStatus};
use crate::error::PipelineError;
use crate::pipeline::ArtifactInfo;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Work performed for each job by a worker.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &DerivedArtifactJob) -> Result<Vec<ArtifactInfo>, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub workers: usize,
    pub queue_size: usize,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_size: 100,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    discarded: AtomicU64,
}

struct QueueInner {
    tx: mpsc::Sender<DerivedArtifactJob>,
    rx: Mutex<mpsc::Receiver<DerivedArtifactJob>>,
    processor: Arc<dyn JobProcessor>,
    config: JobQueueConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
    counters: Counters,
    events: broadcast::Sender<JobEvent>,
}

/// Handle to the queue and its workers. Dropping it stops the workers.
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// Create the queue and spawn its workers on the current runtime.
    pub fn start(config: JobQueueConfig, processor: Arc<dyn JobProcessor>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let workers = config.workers.max(1);

        let inner = Arc::new(QueueInner {
            tx,
            rx: Mutex::new(rx),
            processor,
            config,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            counters: Counters::default(),
            events,
        });

        for worker_id in 0..workers {
            let worker = Arc::clone(&inner);
            inner.tracker.spawn(worker_loop(worker_id, worker));
        }

        info!(
            workers,
            queue_size = inner.config.queue_size,
            retry_attempts = inner.config.retry_attempts,
            "Thumbnail queue started"
        );

        Self { inner }
    }

    /// Enqueue a job without blocking.
    pub fn submit(&self, mut job: DerivedArtifactJob) -> Result<JobId, PipelineError> {
        if self.inner.cancel.is_cancelled() {
            return Err(PipelineError::transient("Thumbnail queue is shut down"));
        }

        let id = *job.id.get_or_insert_with(JobId::new);
        job.created_at.get_or_insert_with(Utc::now);
        let source_key = job.source_key.clone();

        match self.inner.tx.try_send(job) {
            Ok(()) => {
                self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
                self.inner
                    .emit(id, &source_key, JobStatus::Queued, 0, None);
                debug!(job_id = %id, source_key = %source_key, "Queued thumbnail job");
                Ok(id)
            }
            Err(TrySendError::Full(_)) => {
                self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(PipelineError::queue_full(format!(
                    "Thumbnail queue is full ({} jobs)",
                    self.inner.config.queue_size
                )))
            }
            Err(TrySendError::Closed(_)) => {
                Err(PipelineError::transient("Thumbnail queue is closed"))
            }
        }
    }

    /// Stream of job state transitions. Slow subscribers may miss events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.inner.counters;
        QueueStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
        }
    }

    /// Jobs waiting in the queue (not counting those being processed).
    pub fn pending(&self) -> usize {
        self.inner.tx.max_capacity() - self.inner.tx.capacity()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Stop the workers after their in-flight jobs and discard queued jobs.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        let mut rx = self.inner.rx.lock().await;
        let mut discarded = 0u64;
        while let Ok(job) = rx.try_recv() {
            self.inner.discard(&job);
            discarded += 1;
        }
        if discarded > 0 {
            warn!(discarded, "Discarded queued thumbnail jobs on shutdown");
        }
        info!("Thumbnail queue stopped");
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn worker_loop(worker_id: usize, inner: Arc<QueueInner>) {
    debug!(worker_id, "Thumbnail worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            job = async { inner.rx.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };
        inner.run_job(worker_id, job).await;
    }

    debug!(worker_id, "Thumbnail worker stopped");
}

impl QueueInner {
    async fn run_job(self: &Arc<Self>, worker_id: usize, mut job: DerivedArtifactJob) {
        let job_id = *job.id.get_or_insert_with(JobId::new);
        let attempt = job.retry_count + 1;
        self.emit(
            job_id,
            &job.source_key,
            JobStatus::Processing,
            job.retry_count,
            None,
        );

        let started = Instant::now();
        match self.processor.process(&job).await {
            Ok(artifacts) => {
                if let Some(callback) = &job.callback {
                    for artifact in &artifacts {
                        callback(artifact);
                    }
                }
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                self.emit(
                    job_id,
                    &job.source_key,
                    JobStatus::Completed,
                    job.retry_count,
                    None,
                );
                info!(
                    worker_id,
                    job_id = %job_id,
                    source_key = %job.source_key,
                    artifacts = artifacts.len(),
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Thumbnail job completed"
                );
            }
            Err(e) if job.retry_count < self.config.retry_attempts => {
                job.retry_count += 1;
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                self.emit(
                    job_id,
                    &job.source_key,
                    JobStatus::Retrying,
                    job.retry_count,
                    Some(e.to_string()),
                );
                warn!(
                    worker_id,
                    job_id = %job_id,
                    source_key = %job.source_key,
                    attempt,
                    error = %e,
                    "Thumbnail job failed, retrying"
                );
                self.schedule_retry(job);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.emit(
                    job_id,
                    &job.source_key,
                    JobStatus::Failed,
                    job.retry_count,
                    Some(e.to_string()),
                );
                error!(
                    worker_id,
                    job_id = %job_id,
                    source_key = %job.source_key,
                    attempts = attempt,
                    error = %e,
                    "Thumbnail job failed permanently"
                );
            }
        }
    }

    /// Re-enqueue after the configured delay, unless the queue shuts down first.
    fn schedule_retry(self: &Arc<Self>, job: DerivedArtifactJob) {
        let inner = Arc::clone(self);
        let job_id = job.id.unwrap_or_default();
        let source_key = job.source_key.clone();
        let retry_count = job.retry_count;

        self.tracker.spawn(async move {
            let delay = inner.config.retry_delay;
            let tx = inner.tx.clone();
            let requeue = async move {
                tokio::time::sleep(delay).await;
                tx.send(job).await
            };

            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => {
                    inner.counters.discarded.fetch_add(1, Ordering::Relaxed);
                    inner.emit(job_id, &source_key, JobStatus::Discarded, retry_count, None);
                    debug!(job_id = %job_id, "Dropped pending retry on shutdown");
                }
                result = requeue => match result {
                    Ok(()) => inner.emit(job_id, &source_key, JobStatus::Queued, retry_count, None),
                    Err(mpsc::error::SendError(job)) => inner.discard(&job),
                },
            }
        });
    }

    fn discard(&self, job: &DerivedArtifactJob) {
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        self.emit(
            job.id.unwrap_or_default(),
            &job.source_key,
            JobStatus::Discarded,
            job.retry_count,
            None,
        );
    }

    fn emit(
        &self,
        job_id: JobId,
        source_key: &str,
        status: JobStatus,
        retry_count: u32,
        error: Option<String>,
    ) {
        // No subscribers is fine.
        let _ = self.events.send(JobEvent {
            job_id,
            source_key: source_key.to_string(),
            status,
            retry_count,
            error,
        });
    }
}
