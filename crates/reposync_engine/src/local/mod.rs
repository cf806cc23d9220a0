//! Local filesystem contract.

mod disk;
mod uuid_tags;

pub use disk::DiskFileSystem;
#[cfg(unix)]
pub use uuid_tags::XattrUuidTags;
pub use uuid_tags::{SidecarUuidTags, UuidTags, UUID_XATTR};

use reposync_events::{Fingerprint, ObjectKind};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

/// What the engine needs to know about a local path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMetadata {
    /// File or folder.
    pub kind: ObjectKind,
    /// Size in bytes (0 for folders).
    pub len: u64,
    /// Last write time.
    pub modified: SystemTime,
}

/// Local filesystem operations used by producers and solvers.
///
/// All paths are absolute.
pub trait LocalFileSystem: Send + Sync {
    /// Returns metadata, or `None` if nothing exists at `path`.
    fn metadata(&self, path: &Path) -> io::Result<Option<LocalMetadata>>;

    /// Reads a whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replaces a file's content atomically, keeping its UUID.
    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()>;

    /// Creates a folder and any missing parents.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Renames or moves a file or folder.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Removes a file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Removes a folder and everything below it.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Lists the entries of a folder, sorted by name.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Computes the content fingerprint of a file.
    fn fingerprint(&self, path: &Path) -> io::Result<Fingerprint>;

    /// Reads the stable UUID attached to a path.
    fn get_uuid(&self, path: &Path) -> io::Result<Option<Uuid>>;

    /// Attaches a stable UUID; returns `false` if the filesystem cannot
    /// store one.
    fn set_uuid(&self, path: &Path, uuid: Uuid) -> io::Result<bool>;
}
