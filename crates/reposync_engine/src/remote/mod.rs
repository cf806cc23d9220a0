//! Remote repository contract.

mod memory;

pub use memory::MemoryRepository;

use crate::error::SyncResult;
use reposync_events::{ChangeLogPage, RemoteId, RemoteObject};
use std::time::Duration;

/// Client for the remote hierarchical content repository.
///
/// This trait abstracts the wire protocol, allowing different
/// implementations (HTTP client, in-memory repository for tests).
///
/// Implementations apply the configured request timeout to every round
/// trip and report expiry as [`crate::SyncError::Timeout`]. Precondition
/// failures (stale `expected_token`, name collisions) are reported as
/// [`crate::SyncError::Conflict`]; missing objects as
/// [`crate::SyncError::NotFound`].
pub trait RemoteRepository: Send + Sync {
    /// Sets the deadline for each round trip. Called once when a session
    /// is built, with [`crate::SyncConfig::request_timeout`].
    fn set_request_timeout(&self, timeout: Duration) {
        let _ = timeout;
    }

    /// Returns the current head of the change log.
    fn latest_change_token(&self) -> SyncResult<String>;

    /// Returns at most `max` changes recorded after `token`.
    ///
    /// Fails with [`crate::SyncError::StaleChangeToken`] if the token is
    /// unknown or older than the retained log.
    fn get_changes(&self, token: &str, max: usize) -> SyncResult<ChangeLogPage>;

    /// Fetches an object by identifier.
    fn get_object(&self, id: &RemoteId) -> SyncResult<RemoteObject>;

    /// Fetches an object by absolute remote path.
    fn get_object_by_path(&self, path: &str) -> SyncResult<RemoteObject>;

    /// Lists the direct children of a folder.
    fn get_children(&self, id: &RemoteId) -> SyncResult<Vec<RemoteObject>>;

    /// Downloads file content.
    fn get_content(&self, id: &RemoteId) -> SyncResult<Vec<u8>>;

    /// Creates a folder.
    fn create_folder(&self, parent: &RemoteId, name: &str) -> SyncResult<RemoteObject>;

    /// Creates a file with content.
    fn create_document(
        &self,
        parent: &RemoteId,
        name: &str,
        content: &[u8],
    ) -> SyncResult<RemoteObject>;

    /// Replaces file content.
    fn set_content(
        &self,
        id: &RemoteId,
        content: &[u8],
        expected_token: Option<&str>,
    ) -> SyncResult<RemoteObject>;

    /// Renames an object.
    fn update_properties(
        &self,
        id: &RemoteId,
        name: &str,
        expected_token: Option<&str>,
    ) -> SyncResult<RemoteObject>;

    /// Moves an object to another folder.
    fn move_object(
        &self,
        id: &RemoteId,
        source_parent: &RemoteId,
        target_parent: &RemoteId,
    ) -> SyncResult<RemoteObject>;

    /// Deletes an object (folders recursively).
    fn delete(&self, id: &RemoteId, expected_token: Option<&str>) -> SyncResult<()>;
}
