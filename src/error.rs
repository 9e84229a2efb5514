//! Crate-Wide Error Taxonomy
//!
//! Every failure that crosses a channel boundary is folded into [`Error`]:
//! protocol violations from the decoder, rejected outbound values, socket
//! I/O failures, missed deadlines and pool exhaustion. The sub-errors keep
//! their own types ([`ProtocolError`], [`EncodeError`], [`BufferError`]) so
//! call sites can match on the detail they care about, while pipeline
//! handlers and pool callers deal with this one enum.

use crate::codec::{EncodeError, ProtocolError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which deadline was missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// The TCP connect did not complete within the connect timeout.
    Connect,
    /// No read or write activity within the idle timeout.
    Idle,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Connect => write!(f, "connect"),
            TimeoutKind::Idle => write!(f, "idle"),
        }
    }
}

/// Errors produced by channels, codecs and the connection pool.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed inbound data (unknown prefix, bad length, depth limit, ...)
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An outbound value could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Socket-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A connect or idle deadline elapsed.
    #[error("{0} timeout")]
    Timeout(TimeoutKind),

    /// No pooled connection became available within the acquire deadline.
    #[error("connection pool exhausted for {target} (waited {waited:?})")]
    PoolExhausted { target: String, waited: Duration },
}

impl Error {
    /// Returns a ready-made error for operations on a closed channel.
    pub(crate) fn channel_closed() -> Self {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "channel closed",
        ))
    }

    /// Returns a ready-made error for submissions to a stopped event loop.
    pub(crate) fn loop_closed() -> Self {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "event loop stopped",
        ))
    }

    /// Returns true if this error is a connect or idle timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Returns true if this error came from the wire protocol layer.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}
