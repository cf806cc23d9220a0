//! Identity store trait definition.

use crate::error::StoreResult;
use crate::record::IdentityRecord;
use reposync_events::RemoteId;
use std::path::Path;
use uuid::Uuid;

/// Durable storage of identity records and the change-log token.
///
/// Stores are shared between the queue worker, producers and solvers, so
/// every operation takes `&self` and implementations lock internally.
///
/// # Invariants
///
/// - `save` replaces any record with the same remote id
/// - `save` fails with [`crate::StoreError::Constraint`] if another record
///   already owns the UUID or local path
/// - `save` fails with [`crate::StoreError::InvalidRecord`] if the record
///   does not validate
/// - Lookups never return records that fail validation
///
/// # Implementors
///
/// - [`crate::InMemoryStore`] - For testing
/// - [`crate::FileStore`] - For persistent storage
pub trait MetadataStore: Send + Sync {
    /// Looks up a record by remote identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, remote_id: &RemoteId) -> StoreResult<Option<IdentityRecord>>;

    /// Looks up a record by local UUID.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_by_local_uuid(&self, uuid: &Uuid) -> StoreResult<Option<IdentityRecord>>;

    /// Looks up a record by path relative to the sync root.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_by_local_path(&self, path: &Path) -> StoreResult<Option<IdentityRecord>>;

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is invalid, violates a uniqueness
    /// constraint, or cannot be persisted.
    fn save(&self, record: IdentityRecord) -> StoreResult<()>;

    /// Deletes a record, returning it if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion cannot be persisted.
    fn delete(&self, remote_id: &RemoteId) -> StoreResult<Option<IdentityRecord>>;

    /// Returns the last persisted change-log token.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn change_log_token(&self) -> StoreResult<Option<String>>;

    /// Persists the change-log token (or clears it).
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be persisted.
    fn set_change_log_token(&self, token: Option<&str>) -> StoreResult<()>;

    /// Returns every record, ordered by remote identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn records(&self) -> StoreResult<Vec<IdentityRecord>>;

    /// Returns the number of records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn len(&self) -> StoreResult<usize>;

    /// Returns true if the store holds no records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the records whose local path lies strictly below `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn descendants_of(&self, path: &Path) -> StoreResult<Vec<IdentityRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|record| record.local_path != path && record.local_path.starts_with(path))
            .collect())
    }

    /// Returns the records whose remote parent is `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn children_of(&self, parent: &RemoteId) -> StoreResult<Vec<IdentityRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|record| record.parent_remote_id.as_ref() == Some(parent))
            .collect())
    }
}
