//! Stable UUIDs attached to local files and folders.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use uuid::Uuid;

/// Extended attribute holding the UUID.
pub const UUID_XATTR: &str = "user.reposync.uuid";

/// Side channel that keeps a UUID attached to a local object across
/// renames and moves.
pub trait UuidTags: Send + Sync + std::fmt::Debug {
    /// Reads the UUID attached to `path`.
    fn get(&self, path: &Path) -> io::Result<Option<Uuid>>;

    /// Attaches `uuid` to `path`; returns `false` if unsupported.
    fn set(&self, path: &Path, uuid: Uuid) -> io::Result<bool>;

    /// Called before `path` is removed by the engine.
    fn forget(&self, path: &Path) {
        let _ = path;
    }
}

/// UUIDs stored as extended attributes.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct XattrUuidTags;

#[cfg(unix)]
fn is_unsupported(e: &io::Error) -> bool {
    // ENOTSUP / EOPNOTSUPP on Linux and macOS
    matches!(e.raw_os_error(), Some(95) | Some(45) | Some(102))
        || e.kind() == io::ErrorKind::Unsupported
}

#[cfg(unix)]
impl UuidTags for XattrUuidTags {
    fn get(&self, path: &Path) -> io::Result<Option<Uuid>> {
        match xattr::get(path, UUID_XATTR) {
            Ok(Some(bytes)) => Ok(std::str::from_utf8(&bytes)
                .ok()
                .and_then(|text| Uuid::parse_str(text.trim()).ok())),
            Ok(None) => Ok(None),
            Err(e) if is_unsupported(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, path: &Path, uuid: Uuid) -> io::Result<bool> {
        match xattr::set(path, UUID_XATTR, uuid.to_string().as_bytes()) {
            Ok(()) => Ok(true),
            Err(e) if is_unsupported(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FileKey {
    #[cfg(unix)]
    Inode { dev: u64, ino: u64 },
    #[cfg(not(unix))]
    Path(std::path::PathBuf),
}

fn file_key(path: &Path) -> io::Result<FileKey> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let metadata = std::fs::symlink_metadata(path)?;
        Ok(FileKey::Inode {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }
    #[cfg(not(unix))]
    {
        std::fs::symlink_metadata(path)?;
        Ok(FileKey::Path(path.to_path_buf()))
    }
}

/// UUIDs kept in a process-local table keyed by file identity.
///
/// On unix the key is the device and inode number, so a UUID follows its
/// file through renames and moves within the filesystem. The table lives
/// as long as the value; a fresh process re-associates objects by path.
#[derive(Debug, Default)]
pub struct SidecarUuidTags {
    table: Mutex<HashMap<FileKey, Uuid>>,
}

impl SidecarUuidTags {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tagged objects.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Returns true if nothing is tagged.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

impl UuidTags for SidecarUuidTags {
    fn get(&self, path: &Path) -> io::Result<Option<Uuid>> {
        match file_key(path) {
            Ok(key) => Ok(self.table.lock().get(&key).copied()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, path: &Path, uuid: Uuid) -> io::Result<bool> {
        let key = file_key(path)?;
        let mut table = self.table.lock();
        table.retain(|existing_key, existing| *existing != uuid || *existing_key == key);
        table.insert(key, uuid);
        Ok(true)
    }

    fn forget(&self, path: &Path) {
        if let Ok(key) = file_key(path) {
            self.table.lock().remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sidecar_follows_renames() {
        let dir = TempDir::new().unwrap();
        let before = dir.path().join("a.txt");
        let after = dir.path().join("b.txt");
        std::fs::write(&before, b"x").unwrap();

        let tags = SidecarUuidTags::new();
        let uuid = Uuid::new_v4();
        assert!(tags.set(&before, uuid).unwrap());
        std::fs::rename(&before, &after).unwrap();

        assert_eq!(tags.get(&after).unwrap(), Some(uuid));
        assert_eq!(tags.get(&before).unwrap(), None);
    }

    #[test]
    fn sidecar_forget_and_reassign() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"y").unwrap();

        let tags = SidecarUuidTags::new();
        let uuid = Uuid::new_v4();
        tags.set(&a, uuid).unwrap();
        tags.set(&b, uuid).unwrap();
        assert_eq!(tags.get(&a).unwrap(), None);
        assert_eq!(tags.get(&b).unwrap(), Some(uuid));

        tags.forget(&b);
        assert!(tags.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn xattr_tags_round_trip_when_supported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"x").unwrap();

        let tags = XattrUuidTags;
        let uuid = Uuid::new_v4();
        if tags.set(&path, uuid).unwrap_or(false) {
            assert_eq!(tags.get(&path).unwrap(), Some(uuid));
        } else {
            assert_eq!(tags.get(&path).unwrap_or(None), None);
        }
    }
}
