//! Error types for the delivery engine.
//!
//! Transport failures are split by whether a retry can help: timeouts are
//! transient, every other transport failure ends the attempt loop for the
//! batch. Lifecycle errors (closed queue, shutdown timeout, worker panic) and
//! configuration errors surface to the caller directly.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors produced by the delivery engine and its transports.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Connection, DNS, TLS, or protocol failure while sending a batch.
    #[error("network failure: {message}")]
    NetworkError {
        /// Description of the underlying failure
        message: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("request timeout after {timeout:?}")]
    Timeout {
        /// Configured per-request timeout
        timeout: Duration,
    },

    /// A record could not be encoded for the transport.
    #[error("failed to encode record: {message}")]
    EncodingError {
        /// Serializer error message
        message: String,
    },

    /// Invalid pipeline or transport configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// What is wrong with the configuration
        message: String,
    },

    /// The pipeline no longer accepts records.
    #[error("pipeline is shutting down, record rejected")]
    QueueClosed,

    /// Workers did not stop within the shutdown timeout.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// Submitted records were not drained within the drain timeout.
    #[error("drain timed out after {timeout:?} with {pending} records pending")]
    DrainTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
        /// Records still queued or in flight
        pending: usize,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Identifier of the worker
        worker_id: usize,
        /// Panic or join error message
        error: String,
    },
}

impl DeliveryError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingError { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Whether a transport failure is worth another attempt.
    ///
    /// Only timeouts qualify. Other network failures abort the batch
    /// immediately; retryable HTTP statuses are classified by the retry
    /// policy, not here.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(error: serde_json::Error) -> Self {
        Self::encoding(error.to_string())
    }
}
