//! # Stream Errors
//!
//! Transport failures are retried, exhaustion is terminal for the session, and
//! none of these is fatal to the host process.

use thiserror::Error;

/// Failure to open or keep a push transport.
///
/// Cloneable so the session can keep the last one while also handing it to the
/// error callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport handle could not be created, e.g. a malformed endpoint.
    #[error("invalid stream endpoint: {0}")]
    Construction(String),

    /// The resource id could not be turned into a stream URL.
    #[error("stream endpoint resolution failed: {0}")]
    Resolve(String),

    /// The connection could not be established.
    #[error("stream connection failed: {0}")]
    Connect(String),

    /// The server answered with a non-success status.
    #[error("stream endpoint answered HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The server answered with something other than an event stream.
    #[error("unexpected stream content type: {0:?}")]
    ContentType(String),

    /// Reading from an open stream failed.
    #[error("stream read failed: {0}")]
    Read(String),

    /// The remote end closed the stream.
    #[error("stream closed by remote")]
    Closed,
}

/// Errors surfaced to the `on_error` callback and kept as `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// One transport failure. Retried while attempts remain.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Consecutive failures reached the configured ceiling.
    #[error("failed to connect after {attempts} attempts")]
    Exhausted {
        /// Number of consecutive failures.
        attempts: u32,
    },
}

/// Errors creating a [`StatusStreamClient`](super::StatusStreamClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client spawns its transport and timer tasks on the current runtime.
    #[error("status stream client requires a running tokio runtime")]
    NoRuntime,
}
