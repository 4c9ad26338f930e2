//! Middleware pipeline every storage operation flows through.

mod chain;
mod request;
mod terminal;

pub use chain::{Middleware, MiddlewareChain, Next, NoopTerminal, Terminal};
pub use request::{
    ArtifactInfo, ArtifactSet, Operation, Payload, RequestContext, StorageRequest,
    StorageResponse,
};
pub use terminal::BlobTerminal;
