//! Identity records.

use crate::error::{StoreError, StoreResult};
use reposync_events::{Fingerprint, ObjectKind, RemoteId};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

/// Persisted agreement about one synchronized file or folder.
///
/// Created when an object is first observed as synchronized, updated by
/// every solver that completes an action, deleted once both sides agree
/// the object no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Remote object identifier (primary key).
    pub remote_id: RemoteId,
    /// File or folder.
    pub kind: ObjectKind,
    /// Path relative to the local sync root.
    pub local_path: PathBuf,
    /// Remote name at the last agreement.
    pub name: String,
    /// Remote parent identifier at the last agreement.
    pub parent_remote_id: Option<RemoteId>,
    /// Remote change token at the last agreement.
    pub change_token: Option<String>,
    /// Stable UUID attached to the local object.
    pub local_uuid: Option<Uuid>,
    /// Content fingerprint (files only).
    pub fingerprint: Option<Fingerprint>,
    /// Remote modification time at the last agreement.
    pub remote_modified: Option<SystemTime>,
    /// Local write time at the last agreement.
    pub local_modified: Option<SystemTime>,
}

impl IdentityRecord {
    /// Creates a record for a file.
    pub fn file(
        remote_id: impl Into<RemoteId>,
        local_path: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(ObjectKind::File, remote_id, local_path, name)
    }

    /// Creates a record for a folder.
    pub fn folder(
        remote_id: impl Into<RemoteId>,
        local_path: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(ObjectKind::Folder, remote_id, local_path, name)
    }

    /// Creates a record of the given kind.
    pub fn new(
        kind: ObjectKind,
        remote_id: impl Into<RemoteId>,
        local_path: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            kind,
            local_path: local_path.into(),
            name: name.into(),
            parent_remote_id: None,
            change_token: None,
            local_uuid: None,
            fingerprint: None,
            remote_modified: None,
            local_modified: None,
        }
    }

    /// Sets the remote parent.
    pub fn with_parent(mut self, parent: impl Into<RemoteId>) -> Self {
        self.parent_remote_id = Some(parent.into());
        self
    }

    /// Sets the remote change token.
    pub fn with_change_token(mut self, token: impl Into<String>) -> Self {
        self.change_token = Some(token.into());
        self
    }

    /// Sets the local UUID.
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.local_uuid = Some(uuid);
        self
    }

    /// Sets the content fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Sets the last known remote modification time.
    pub fn with_remote_modified(mut self, modified: SystemTime) -> Self {
        self.remote_modified = Some(modified);
        self
    }

    /// Sets the last known local write time.
    pub fn with_local_modified(mut self, modified: SystemTime) -> Self {
        self.local_modified = Some(modified);
        self
    }

    /// Returns true for folder records.
    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    /// Local file name, derived from the stored path.
    pub fn local_name(&self) -> Option<&str> {
        self.local_path.file_name().and_then(|name| name.to_str())
    }

    /// Relative path of the local parent folder (empty for top-level objects).
    pub fn local_parent(&self) -> &Path {
        self.local_path.parent().unwrap_or(Path::new(""))
    }

    /// Returns true if `path` lies strictly below this record's path.
    pub fn contains(&self, path: &Path) -> bool {
        path != self.local_path && path.starts_with(&self.local_path)
    }

    /// Checks the record invariants.
    pub fn validate(&self) -> StoreResult<()> {
        let fail = |reason: &str| Err(StoreError::invalid(self.remote_id.as_str(), reason));

        if self.remote_id.is_empty() {
            return fail("empty remote id");
        }
        if self.name.is_empty() {
            return fail("empty name");
        }
        if self.local_path.as_os_str().is_empty() {
            return fail("empty local path");
        }
        let normal = self
            .local_path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !normal {
            return fail("local path must be relative and normalized");
        }
        match (&self.kind, &self.fingerprint) {
            (ObjectKind::Folder, Some(_)) => return fail("folder carries a fingerprint"),
            (_, Some(fingerprint)) if !fingerprint.is_well_formed() => {
                return fail("malformed fingerprint")
            }
            _ => {}
        }
        if self.change_token.as_deref() == Some("") {
            return fail("empty change token");
        }
        Ok(())
    }
}
