//! Worker-specific error types.

use std::io;
use thiserror::Error;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Broad classification of a [`WorkerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required field was missing before the worker was contacted.
    Validation,
    /// The worker produced a line that could not be interpreted.
    Protocol,
    /// The worker reported a failure for the request.
    Computation,
    /// The worker process could not be reached, crashed or was stopped.
    Process,
}

/// Errors that can occur during worker communication.
#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    /// Failed to spawn the worker process.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(String),

    /// Failed to write to worker stdin.
    #[error("failed to write to worker: {0}")]
    WriteFailed(String),

    /// Failed to serialize request to JSON.
    #[error("failed to serialize request: {0}")]
    SerializeFailed(String),

    /// The worker emitted a line that is not a valid response.
    #[error("failed to parse response: {0}")]
    Protocol(String),

    /// The worker reported an error, on its output line or on stderr.
    #[error("{0}")]
    Computation(String),

    /// The in-flight request did not receive a reply in time.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The worker terminated while the request was queued or in flight.
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The restart budget is exhausted; the capability no longer accepts work.
    #[error("worker restart limit reached, capability disabled")]
    CircuitOpen,

    /// The pending-request queue is at its configured bound.
    #[error("request queue full ({0} pending)")]
    QueueFull(usize),

    /// The service was shut down before the request completed.
    #[error("worker service is shutting down")]
    ShuttingDown,

    /// Response channel was closed (internal error).
    #[error("response channel closed unexpectedly")]
    ChannelClosed,

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl WorkerError {
    /// Create a computation error from a worker-reported message.
    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation(message.into())
    }

    /// Create a protocol error from a description of what was wrong.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) | Self::SerializeFailed(_) => ErrorKind::Validation,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Computation(_) => ErrorKind::Computation,
            Self::SpawnFailed(_)
            | Self::WriteFailed(_)
            | Self::Timeout(_)
            | Self::WorkerUnavailable(_)
            | Self::CircuitOpen
            | Self::QueueFull(_)
            | Self::ShuttingDown
            | Self::ChannelClosed => ErrorKind::Process,
        }
    }

    /// Check if this error indicates the worker has exited.
    pub fn is_worker_exited(&self) -> bool {
        matches!(self, Self::WorkerUnavailable(_) | Self::ChannelClosed)
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<io::Error> for WorkerError {
    fn from(err: io::Error) -> Self {
        Self::WriteFailed(err.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for WorkerError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}
