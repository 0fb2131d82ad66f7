//! Error taxonomy for request operations.
//!
//! Network-level failures live in [`TransportError`] and are surfaced from the
//! transport unchanged. Everything that can reach a completion handler is a
//! [`RequestError`]; none of these are ever propagated as panics across the
//! operation boundary.

use thiserror::Error;

/// Network-level failure reported by a transport.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection timeout")]
    Timeout,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("too many redirects")]
    TooManyRedirects,

    /// The transfer was aborted in response to a cancellation request.
    #[error("transfer aborted")]
    Aborted,

    #[error("failed to read body: {0}")]
    Body(String),

    /// The transport dropped the exchange without reporting an outcome.
    #[error("transport dropped the exchange")]
    Dropped,

    #[error("destination I/O failed: {0}")]
    Io(String),
}

/// Failure arm of a [`ResponseEnvelope`](crate::response::ResponseEnvelope).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RequestError {
    /// Network or connection failure, carried from the transport unchanged.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Typed deserialization failed against the declared response shape.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The operation was cancelled before or during execution.
    #[error("operation cancelled")]
    Cancelled,

    /// A structurally successful response was rejected by application policy,
    /// e.g. an unacceptable status code.
    #[error("response rejected: {0}")]
    Validation(String),
}

impl RequestError {
    /// Maps a transport-level error into the envelope taxonomy. An abort is the
    /// transport acknowledging cancellation, not a network fault.
    pub fn from_transport(error: &TransportError) -> Self {
        match error {
            TransportError::Aborted => RequestError::Cancelled,
            other => RequestError::Transport(other.clone()),
        }
    }
}
