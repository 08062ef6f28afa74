use std::{io, net::SocketAddr};

use crate::{proto, uri::UriError};

/// Ways in which the upgrade response can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("server sent no response")]
    NoResponse,
    #[error("unexpected status line: {0:?}")]
    UnexpectedStatus(String),
    #[error("unexpected Sec-WebSocket-Accept value: {0:?}")]
    AcceptMismatch(String),
}

/// Errors produced by the transport, the handshake and the workers.
///
/// Only a subset of these ever cross thread boundaries: workers map every fatal
/// error to an invalidated channel, and the supervisor only logs what its connector
/// returns before retrying.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid URI: {0}")]
    Config(#[from] UriError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to resolve {host:?} after {attempts} attempt(s): {source}")]
    Resolution {
        host: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("no address found for {0:?}")]
    NoAddress(String),
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("network not ready")]
    NotReady,
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("connection closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol violation: {0}")]
    Protocol(#[from] proto::DecodeError),
    #[error(transparent)]
    Encode(#[from] proto::EncodeError),
}

impl Error {
    /// Whether this error leaves the channel it occurred on unusable.
    ///
    /// An oversized payload is the only decode error after which framing is still
    /// intact, provided the payload gets drained.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Protocol(proto::DecodeError::PayloadTooLarge { .. })
        )
    }
}
