//! Error types for identity store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the identity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal is corrupted beyond the recoverable tail.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A record violates the record invariants.
    #[error("invalid record {remote_id}: {reason}")]
    InvalidRecord {
        /// Remote identifier of the offending record.
        remote_id: String,
        /// Why the record is invalid.
        reason: String,
    },

    /// Saving would give two records the same UUID or path.
    #[error("{field} {value} already belongs to {owner}")]
    Constraint {
        /// Name of the unique field.
        field: &'static str,
        /// The duplicated value.
        value: String,
        /// Remote identifier of the record that owns the value.
        owner: String,
    },

    /// Another process holds the store lock.
    #[error("store at {0} is locked by another process")]
    Locked(PathBuf),
}

impl StoreError {
    /// Creates an invalid-record error.
    pub fn invalid(remote_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            remote_id: remote_id.into(),
            reason: reason.into(),
        }
    }
}
