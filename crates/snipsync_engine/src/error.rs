//! Error types for the sync engine.

use snipsync_protocol::{FailureKind, SyncFailure};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A full server response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Credentials were rejected (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// The server refuses this client (HTTP 403).
    #[error("forbidden")]
    Forbidden,

    /// Cache read/write failure. Swallowed by the coordinator.
    #[error("cache error: {0}")]
    Cache(String),

    /// Not connected to the live endpoint.
    #[error("not connected")]
    NotConnected,

    /// The operation raced a shutdown.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Unauthorized => true,
            _ => false,
        }
    }

    /// Converts to the observer-facing failure classification.
    pub fn to_failure(&self) -> SyncFailure {
        let kind = match self {
            SyncError::Transport { .. } | SyncError::NotConnected => FailureKind::Transport,
            // Full-response decode failures are transport-class for
            // consumers; the distinction only matters for logging.
            SyncError::Decode(_) => FailureKind::Decode,
            SyncError::Unauthorized => FailureKind::Unauthorized,
            SyncError::Forbidden => FailureKind::Forbidden,
            SyncError::Cache(_) => FailureKind::Transport,
            SyncError::Cancelled => FailureKind::Cancelled,
        };
        SyncFailure::new(kind, self.to_string())
    }
}
