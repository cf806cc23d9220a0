//! Remote object model.

use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Identifier of an object in the remote repository.
///
/// Opaque to the engine; only compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    /// Creates an identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RemoteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Kind of a synchronized object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A document with content.
    File,
    /// A container of other objects.
    Folder,
}

impl ObjectKind {
    /// Returns true for files.
    pub fn is_file(&self) -> bool {
        matches!(self, ObjectKind::File)
    }

    /// Returns true for folders.
    pub fn is_folder(&self) -> bool {
        matches!(self, ObjectKind::Folder)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::File => f.write_str("file"),
            ObjectKind::Folder => f.write_str("folder"),
        }
    }
}

/// Snapshot of an object as reported by the remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Object identifier.
    pub id: RemoteId,
    /// Identifier of the containing folder (`None` for the repository root).
    pub parent_id: Option<RemoteId>,
    /// Object name within its parent.
    pub name: String,
    /// Absolute remote path, `/`-separated.
    pub path: String,
    /// File or folder.
    pub kind: ObjectKind,
    /// Opaque version stamp, changes on every modification.
    pub change_token: String,
    /// Content fingerprint (files only).
    pub fingerprint: Option<Fingerprint>,
    /// Last modification time reported by the repository.
    pub last_modified: SystemTime,
}

impl RemoteObject {
    /// Returns true if this object is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    /// Returns the remote path of the parent folder.
    pub fn parent_path(&self) -> &str {
        match self.path.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &self.path[..idx],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(path: &str) -> RemoteObject {
        RemoteObject {
            id: RemoteId::new("id-1"),
            parent_id: Some(RemoteId::new("root")),
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            path: path.to_string(),
            kind: ObjectKind::File,
            change_token: "1".into(),
            fingerprint: None,
            last_modified: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn remote_id_display_and_conversions() {
        let id: RemoteId = "workspace://SpacesStore/42".into();
        assert_eq!(id.to_string(), "workspace://SpacesStore/42");
        assert_eq!(id.as_str(), "workspace://SpacesStore/42");
        assert!(!id.is_empty());
        assert!(RemoteId::new("").is_empty());
    }

    #[test]
    fn parent_path_of_nested_and_top_level_objects() {
        assert_eq!(object("/docs/report.txt").parent_path(), "/docs");
        assert_eq!(object("/report.txt").parent_path(), "/");
        assert_eq!(object("/a/b/c").parent_path(), "/a/b");
    }

    #[test]
    fn kind_predicates() {
        assert!(ObjectKind::File.is_file());
        assert!(!ObjectKind::File.is_folder());
        assert!(ObjectKind::Folder.is_folder());
        assert_eq!(ObjectKind::Folder.to_string(), "folder");
    }
}
