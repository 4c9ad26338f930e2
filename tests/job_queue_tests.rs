use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blob_pipeline::error::{ErrorKind, PipelineError};
use blob_pipeline::pipeline::{ArtifactInfo, ArtifactSet};
use blob_pipeline::thumbnails::{
    DerivedArtifactJob, JobEvent, JobProcessor, JobQueue, JobQueueConfig, JobStatus,
    ThumbnailSize,
};
use tokio::sync::{broadcast, mpsc, Semaphore};

/// Blocks every job until a permit is released, announcing each start.
struct GatedProcessor {
    permits: Semaphore,
    started: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl JobProcessor for GatedProcessor {
    async fn process(&self, job: &DerivedArtifactJob) -> Result<Vec<ArtifactInfo>, PipelineError> {
        let _ = self.started.send(job.source_key.clone());
        self.permits
            .acquire()
            .await
            .map_err(|_| PipelineError::transient("gate closed"))?
            .forget();
        Ok(Vec::new())
    }
}

/// Fails until attempt `succeed_on` (1-based), or always when `None`.
struct FlakyProcessor {
    attempts: AtomicU32,
    succeed_on: Option<u32>,
}

#[async_trait]
impl JobProcessor for FlakyProcessor {
    async fn process(&self, job: &DerivedArtifactJob) -> Result<Vec<ArtifactInfo>, PipelineError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if Some(attempt) != self.succeed_on {
            return Err(PipelineError::transient(format!("attempt {attempt} failed")));
        }
        Ok(job
            .sizes
            .iter()
            .map(|size| ArtifactInfo {
                label: size.label.clone(),
                key: format!("{}_{}", job.source_key, size.label),
                width: size.width,
                height: size.height,
                byte_size: 42,
            })
            .collect())
    }
}

fn config(workers: usize, queue_size: usize, retry_attempts: u32) -> JobQueueConfig {
    JobQueueConfig {
        workers,
        queue_size,
        retry_attempts,
        retry_delay: Duration::from_millis(10),
    }
}

fn job(key: &str) -> DerivedArtifactJob {
    DerivedArtifactJob::new(key, "files", vec![ThumbnailSize::new(150, 150)])
}

fn gated() -> (Arc<GatedProcessor>, mpsc::UnboundedReceiver<String>) {
    let (started, rx) = mpsc::unbounded_channel();
    let processor = Arc::new(GatedProcessor {
        permits: Semaphore::new(0),
        started,
    });
    (processor, rx)
}

/// Collect events until one with a terminal status arrives.
async fn until_terminal(events: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let collect = async {
        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.expect("event stream closed");
            let done = event.status.is_terminal();
            seen.push(event);
            if done {
                return seen;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("job did not finish in time")
}

#[tokio::test]
async fn test_full_queue_rejects_without_blocking() {
    let (processor, mut started) = gated();
    let queue = JobQueue::start(config(1, 2, 0), processor.clone());
    let mut events = queue.subscribe();

    queue.submit(job("first")).unwrap();
    assert_eq!(started.recv().await.as_deref(), Some("first"));

    // The only worker is busy, so these two fill the queue
    queue.submit(job("second")).unwrap();
    queue.submit(job("third")).unwrap();

    let err = queue.submit(job("fourth")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::QueueFull);
    assert_eq!(queue.pending(), 2);

    processor.permits.add_permits(3);

    let mut completed = Vec::new();
    while completed.len() < 3 {
        for event in until_terminal(&mut events).await {
            if event.status == JobStatus::Completed {
                completed.push(event.source_key);
            }
        }
    }
    assert_eq!(completed, vec!["first", "second", "third"]);

    let stats = queue.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.completed, 3);
}

#[tokio::test]
async fn test_deterministic_failure_retries_exactly_configured_times() {
    let processor = Arc::new(FlakyProcessor {
        attempts: AtomicU32::new(0),
        succeed_on: None,
    });
    let queue = JobQueue::start(config(2, 10, 3), processor.clone());
    let mut events = queue.subscribe();

    queue.submit(job("broken")).unwrap();
    let seen = until_terminal(&mut events).await;

    let last = seen.last().unwrap();
    assert_eq!(last.status, JobStatus::Failed);
    assert_eq!(last.retry_count, 3);
    assert!(last.error.is_some());

    let retries = seen.iter().filter(|e| e.status == JobStatus::Retrying).count();
    assert_eq!(retries, 3);
    assert_eq!(processor.attempts.load(Ordering::SeqCst), 4);

    let stats = queue.stats();
    assert_eq!((stats.retried, stats.failed, stats.completed), (3, 1, 0));
}

#[tokio::test]
async fn test_success_on_second_attempt_completes() {
    let processor = Arc::new(FlakyProcessor {
        attempts: AtomicU32::new(0),
        succeed_on: Some(2),
    });
    // Three attempts allowed in total
    let queue = JobQueue::start(config(1, 10, 2), processor.clone());
    let mut events = queue.subscribe();

    let artifacts = ArtifactSet::new();
    artifacts.replace(vec![ArtifactInfo {
        label: "150x150".into(),
        key: "flaky_150x150".into(),
        width: 150,
        height: 150,
        byte_size: 0,
    }]);
    let sink = artifacts.clone();
    queue
        .submit(job("flaky").with_callback(Arc::new(move |a: &ArtifactInfo| sink.complete(a))))
        .unwrap();

    let seen = until_terminal(&mut events).await;
    let last = seen.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.retry_count, 1);
    assert_eq!(processor.attempts.load(Ordering::SeqCst), 2);

    assert!(artifacts.all_ready());
    assert_eq!(artifacts.snapshot()[0].byte_size, 42);
}

#[tokio::test]
async fn test_shutdown_discards_queued_jobs() {
    let (processor, mut started) = gated();
    let queue = Arc::new(JobQueue::start(config(1, 5, 0), processor.clone()));

    queue.submit(job("in-flight")).unwrap();
    assert_eq!(started.recv().await.as_deref(), Some("in-flight"));
    for key in ["q1", "q2", "q3"] {
        queue.submit(job(key)).unwrap();
    }

    let stopping = Arc::clone(&queue);
    let shutdown = tokio::spawn(async move { stopping.shutdown().await });
    while !queue.is_shut_down() {
        tokio::task::yield_now().await;
    }

    // Let the in-flight job finish; nothing else may start
    processor.permits.add_permits(10);
    tokio::time::timeout(Duration::from_secs(5), shutdown)
        .await
        .expect("shutdown hung")
        .unwrap();

    let stats = queue.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.discarded, 3);
    assert!(started.try_recv().is_err());

    let err = queue.submit(job("late")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TransientFailure);
}
