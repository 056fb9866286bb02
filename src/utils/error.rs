//! The `error` module defines the error type shared by the codec, the
//! connection handler, the broker and the client helper.
//!
//! Every per-connection failure is local to that connection: the handler logs
//! it and tears the connection down, the broker keeps running.

use std::io;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A fixed-size header did not have the expected number of bytes.
    #[error("malformed header: expected {expected} bytes, got {actual}")]
    MalformedHeader { expected: usize, actual: usize },

    /// The peer closed before the declared body (or topic list) arrived.
    #[error("truncated body: expected {expected} bytes, received {received}")]
    TruncatedBody { expected: usize, received: usize },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("connection reset: {0}")]
    ConnectionReset(#[source] io::Error),

    #[error("not connected")]
    NotConnected,

    #[error("no frame received within {0:?}")]
    ReadTimeout(Duration),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }
}
