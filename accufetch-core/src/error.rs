//! Error types for the accufetch engine
//!
//! Errors are split by who observes them:
//!
//! ```text
//! FetchError      - settles an individual caller's pending response
//! TransportError  - returned by a Transport for a whole batch
//! DispatchError   - handed to the engine's ErrorHandler, once per failed batch
//! ```
//!
//! A `TransportError` never settles pending calls. The engine pauses itself
//! and reports a `DispatchError`; the calls stay queued for the next attempt.

use thiserror::Error;

/// Outcome delivered to a single caller whose request did not get a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The engine was closed, or its cancellation token fired, before a
    /// response arrived for this request.
    #[error("fetch task cancelled because the engine is closing")]
    Cancelled,

    /// The caller's own cancellation token fired first.
    #[error("fetch task aborted by caller")]
    Aborted,

    /// The batch this request was in came back with the wrong number of
    /// responses. The engine is shut down after this.
    #[error("illegal state: {actual} responses for a batch of {expected} requests")]
    ProtocolViolation { expected: usize, actual: usize },
}

/// Failure reported by a [`Transport`](crate::Transport) for one batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport honoured the shared cancellation token.
    #[error("batch request cancelled")]
    Cancelled,

    /// The endpoint could not be reached.
    #[error("{0}")]
    Connection(String),

    /// The endpoint answered with an error envelope.
    #[error("{0}")]
    Server(String),

    /// The endpoint answered with something that is not a batch response.
    #[error("malformed batch response: {0}")]
    Decode(String),

    /// Anything else.
    #[error("{0}")]
    Unknown(String),
}

impl TransportError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a server error
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an unknown error
    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Whether this is the transport's answer to a cancelled token
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Error reported to the application through the engine's
/// [`ErrorHandler`](crate::ErrorHandler).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The batch failed in the transport. The engine is now interrupted.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The transport reported cancellation while the engine was not closing.
    #[error("batch request cancelled while the engine was still open")]
    Cancelled,

    /// Response count did not match request count. Fatal: the engine closes.
    #[error("protocol violation: {actual} responses for a batch of {expected} requests")]
    ProtocolViolation { expected: usize, actual: usize },

    /// The transport panicked while sending the batch.
    #[error("transport panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Fatal errors shut the engine down instead of pausing it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}
