//! Observer-facing sync outcomes.

use std::fmt;

/// Classification of a failure surfaced to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network unreachable, timeout, or a full-response decode failure.
    Transport,
    /// The server payload could not be decoded.
    Decode,
    /// Credentials were rejected and could not be refreshed.
    Unauthorized,
    /// The server refuses this client.
    Forbidden,
    /// The operation raced a shutdown.
    Cancelled,
}

/// A failure carried inside [`SyncOutcome::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
}

impl SyncFailure {
    /// Creates a failure of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Tri-state outcome published to observers.
///
/// The core never discards the last good data on failure: `Error` carries the
/// previous data whenever any existed.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome<T> {
    /// Work is in flight; `partial` is the best currently-known data.
    Progress {
        /// Last known data, if any.
        partial: Option<T>,
    },
    /// Fresh data.
    Success {
        /// The data.
        data: T,
    },
    /// Something failed; previously-known-good data is retained.
    Error {
        /// What failed.
        cause: SyncFailure,
        /// Last known data, if any.
        last_known: Option<T>,
    },
}

impl<T> SyncOutcome<T> {
    /// Creates a progress outcome.
    pub fn progress(partial: Option<T>) -> Self {
        SyncOutcome::Progress { partial }
    }

    /// Creates a success outcome.
    pub fn success(data: T) -> Self {
        SyncOutcome::Success { data }
    }

    /// Creates an error outcome.
    pub fn failure(cause: SyncFailure, last_known: Option<T>) -> Self {
        SyncOutcome::Error { cause, last_known }
    }

    /// Returns true for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success { .. })
    }

    /// The best currently-known data, regardless of state.
    pub fn data(&self) -> Option<&T> {
        match self {
            SyncOutcome::Progress { partial } => partial.as_ref(),
            SyncOutcome::Success { data } => Some(data),
            SyncOutcome::Error { last_known, .. } => last_known.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_accessor_covers_all_states() {
        assert_eq!(SyncOutcome::<u32>::progress(None).data(), None);
        assert_eq!(SyncOutcome::progress(Some(1)).data(), Some(&1));
        assert_eq!(SyncOutcome::success(2).data(), Some(&2));

        let failed = SyncOutcome::failure(
            SyncFailure::new(FailureKind::Transport, "unreachable"),
            Some(3),
        );
        assert_eq!(failed.data(), Some(&3));
        assert!(!failed.is_success());
    }
}
