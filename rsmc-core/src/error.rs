//! Top-level error type. The request/transport layer reports failures
//! through `Reply`/`fail()` (spec.md §3), not `Result` — this type is
//! for the narrower set of operations that fail before a request ever
//! reaches a transport: building a cluster, running a handshake.

use thiserror::Error;

use crate::protocol::{ProtocolError, Status};

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server returned {0}")]
    Status(Status),

    #[error("transport is disposed")]
    Disposed,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("no node available for key")]
    NoNodeAvailable,
}
