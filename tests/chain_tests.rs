use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use blob_pipeline::error::{ErrorKind, PipelineError};
use blob_pipeline::pipeline::{
    Middleware, MiddlewareChain, Next, RequestContext, StorageRequest, StorageResponse, Terminal,
};

type Log = Arc<Mutex<Vec<String>>>;

struct Recording {
    name: &'static str,
    log: Log,
    short_circuit: bool,
}

#[async_trait]
impl Middleware for Recording {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        request: StorageRequest,
        next: Next<'_>,
    ) -> StorageResponse {
        self.log.lock().unwrap().push(format!("{}.pre", self.name));
        if self.short_circuit {
            return StorageResponse::failure(PipelineError::access_denied("stopped"));
        }
        let response = next.run(ctx, request).await;
        self.log.lock().unwrap().push(format!("{}.post", self.name));
        response
    }
}

struct RecordingTerminal {
    log: Log,
    fail_with: Option<PipelineError>,
}

#[async_trait]
impl Terminal for RecordingTerminal {
    async fn execute(&self, _ctx: &RequestContext, request: StorageRequest) -> StorageResponse {
        self.log.lock().unwrap().push("terminal".to_string());
        match &self.fail_with {
            Some(e) => StorageResponse::failure(e.clone()),
            None => StorageResponse::ok().with_file_key(request.file_key),
        }
    }
}

fn recording(name: &'static str, log: &Log) -> Arc<dyn Middleware> {
    Arc::new(Recording {
        name,
        log: Arc::clone(log),
        short_circuit: false,
    })
}

fn chain_with(log: &Log, fail_with: Option<PipelineError>) -> MiddlewareChain {
    MiddlewareChain::with_terminal(Arc::new(RecordingTerminal {
        log: Arc::clone(log),
        fail_with,
    }))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn test_middlewares_wrap_terminal_in_order() {
    let log = Log::default();
    let mut chain = chain_with(&log, None);
    chain
        .add(recording("A", &log))
        .add(recording("B", &log))
        .add(recording("C", &log));

    let response = chain
        .process(&RequestContext::new(), StorageRequest::download("k"))
        .await;

    assert!(response.success);
    assert_eq!(
        entries(&log),
        vec!["A.pre", "B.pre", "C.pre", "terminal", "C.post", "B.post", "A.post"]
    );
}

#[tokio::test]
async fn test_short_circuit_skips_rest_of_chain() {
    let log = Log::default();
    let mut chain = chain_with(&log, None);
    chain.add(recording("A", &log));
    chain.add(Arc::new(Recording {
        name: "B",
        log: Arc::clone(&log),
        short_circuit: true,
    }));
    chain.add(recording("C", &log));

    let response = chain
        .process(&RequestContext::new(), StorageRequest::delete("k"))
        .await;

    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind, ErrorKind::AccessDenied);
    assert_eq!(entries(&log), vec!["A.pre", "B.pre", "A.post"]);
}

#[tokio::test]
async fn test_empty_chain_succeeds_immediately() {
    let chain = MiddlewareChain::new();
    assert!(chain.is_empty());

    let response = chain
        .process(&RequestContext::new(), StorageRequest::preview("some/key"))
        .await;

    assert!(response.success);
    assert_eq!(response.file_key, "some/key");
}

#[tokio::test]
async fn test_terminal_failure_reaches_every_middleware() {
    let log = Log::default();
    let mut chain = chain_with(&log, Some(PipelineError::upstream("store down")));
    chain.add(recording("A", &log)).add(recording("B", &log));

    let response = chain
        .process(&RequestContext::new(), StorageRequest::download("k"))
        .await;

    let error = response.into_result().unwrap_err();
    assert_eq!(error.kind, ErrorKind::UpstreamFailure);
    assert_eq!(error.message, "store down");
    assert_eq!(entries(&log), vec!["A.pre", "B.pre", "terminal", "B.post", "A.post"]);
}

#[tokio::test]
async fn test_cloned_chains_run_concurrently() {
    let log = Log::default();
    let mut chain = chain_with(&log, None);
    chain.add(recording("A", &log));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let chain = chain.clone();
            tokio::spawn(async move {
                chain
                    .process(&RequestContext::new(), StorageRequest::download(format!("k{i}")))
                    .await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let response = handle.await.unwrap();
        assert_eq!(response.file_key, format!("k{i}"));
    }
    assert_eq!(entries(&log).len(), 8 * 3);
}
