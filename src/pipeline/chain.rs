use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use super::request::{RequestContext, StorageRequest, StorageResponse};

/// A named unit of cross-cutting behavior wrapped around every operation.
///
/// Implementations call `next.run(ctx, request)` to continue down the chain
/// and may post-process what comes back. Returning without calling `next`
/// short-circuits: no later middleware and no terminal operation runs.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(
        &self,
        ctx: &RequestContext,
        request: StorageRequest,
        next: Next<'_>,
    ) -> StorageResponse;
}

/// The innermost step of a chain, normally an operation against the blob store.
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn execute(&self, ctx: &RequestContext, request: StorageRequest) -> StorageResponse;
}

/// Terminal that succeeds without side effects.
pub struct NoopTerminal;

#[async_trait]
impl Terminal for NoopTerminal {
    async fn execute(&self, _ctx: &RequestContext, request: StorageRequest) -> StorageResponse {
        StorageResponse::ok().with_file_key(request.file_key)
    }
}

/// Cursor over the middlewares that have not run yet.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: &RequestContext, request: StorageRequest) -> StorageResponse {
        match self.remaining.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    remaining: rest,
                    terminal: self.terminal,
                };
                current.process(ctx, request, next).await
            }
            None => self.terminal.execute(ctx, request).await,
        }
    }
}

/// Ordered, append-only list of middlewares around a terminal.
///
/// The first middleware added runs first on the way in and last on the way
/// out. The chain holds no mutable state, so concurrent `process` calls are
/// independent. Panics inside a middleware are not caught here.
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
    terminal: Arc<dyn Terminal>,
}

impl MiddlewareChain {
    /// An empty chain whose terminal is a no-op success.
    pub fn new() -> Self {
        Self::with_terminal(Arc::new(NoopTerminal))
    }

    pub fn with_terminal(terminal: Arc<dyn Terminal>) -> Self {
        Self {
            middlewares: Vec::new(),
            terminal,
        }
    }

    pub fn add(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub async fn process(&self, ctx: &RequestContext, request: StorageRequest) -> StorageResponse {
        let span = tracing::info_span!(
            "storage_request",
            request_id = %ctx.request_id,
            operation = %request.operation,
        );
        let next = Next {
            remaining: &self.middlewares,
            terminal: self.terminal.as_ref(),
        };
        next.run(ctx, request).instrument(span).await
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}
