//! Error types for the reconciliation pipeline.

use reposync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing.
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

    /// A remote round trip exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The remote object does not exist.
    #[error("remote object {id} not found")]
    NotFound {
        /// Identifier or path that was looked up.
        id: String,
    },

    /// The remote side refused the operation.
    #[error("permission denied on {target}")]
    PermissionDenied {
        /// Object the operation targeted.
        target: String,
    },

    /// The remote precondition no longer holds (stale change token,
    /// name collision).
    #[error("conflict on {id}: {reason}")]
    Conflict {
        /// Object the operation targeted.
        id: String,
        /// What did not match.
        reason: String,
    },

    /// The change-log token was rejected by the remote side.
    #[error("change-log token is stale")]
    StaleChangeToken,

    /// A situation the engine refuses to resolve on its own.
    #[error("unresolved conflict at {path}: {reason}")]
    UnresolvedConflict {
        /// Local path (or remote id) of the object.
        path: String,
        /// Why it could not be resolved.
        reason: String,
    },

    /// The operation was cancelled by a newer request.
    #[error("sync cancelled")]
    Cancelled,

    /// The session is suspended.
    #[error("sync session suspended")]
    Suspended,

    /// An event lacks the information needed to process it.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Identity store error.
    #[error("identity store error: {0}")]
    Store(#[from] StoreError),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
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

    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a remote precondition conflict.
    pub fn conflict(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unresolved-conflict error.
    pub fn unresolved(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnresolvedConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }

    /// Returns true if the error means the situation changed under the
    /// solver, so re-classifying may pick a different solver.
    pub fn is_race(&self) -> bool {
        matches!(self, SyncError::NotFound { .. } | SyncError::Conflict { .. })
    }

    /// Returns true for permission errors.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SyncError::PermissionDenied { .. })
    }

    /// Returns true if the local filesystem reported a missing path.
    pub fn is_local_not_found(&self) -> bool {
        matches!(self, SyncError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::not_found("x").is_retryable());
    }

    #[test]
    fn race_errors() {
        assert!(SyncError::not_found("doc-1").is_race());
        assert!(SyncError::conflict("doc-1", "token mismatch").is_race());
        assert!(!SyncError::Timeout.is_race());
        assert!(!SyncError::unresolved("a", "b").is_race());
    }

    #[test]
    fn error_display() {
        let err = SyncError::PermissionDenied {
            target: "doc-9".into(),
        };
        assert!(err.is_permission_denied());
        assert_eq!(err.to_string(), "permission denied on doc-9");

        let err: SyncError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.is_local_not_found());
    }
}
