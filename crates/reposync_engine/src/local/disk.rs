//! Local filesystem backed by the OS.

use super::{LocalFileSystem, LocalMetadata, UuidTags};
use crate::ignore::TEMP_SUFFIX;
use reposync_events::{Fingerprint, ObjectKind};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

/// A [`LocalFileSystem`] over `std::fs`.
///
/// Writes go to a sibling temporary file that is renamed over the target,
/// so readers never see a half-written file. The UUID side channel is
/// pluggable; see [`super::XattrUuidTags`] and [`super::SidecarUuidTags`].
#[derive(Debug, Clone)]
pub struct DiskFileSystem {
    tags: Arc<dyn UuidTags>,
}

impl DiskFileSystem {
    /// Creates a filesystem using the given UUID side channel.
    pub fn new(tags: Arc<dyn UuidTags>) -> Self {
        Self { tags }
    }

    /// Creates a filesystem storing UUIDs in extended attributes.
    #[cfg(unix)]
    pub fn with_xattrs() -> Self {
        Self::new(Arc::new(super::XattrUuidTags))
    }

    /// Creates a filesystem with a process-local UUID table.
    pub fn with_sidecar() -> Self {
        Self::new(Arc::new(super::SidecarUuidTags::new()))
    }

    fn forget_tree(&self, path: &Path) {
        if let Ok(entries) = self.list_dir(path) {
            for entry in entries {
                self.forget_tree(&entry);
            }
        }
        self.tags.forget(path);
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

impl LocalFileSystem for DiskFileSystem {
    fn metadata(&self, path: &Path) -> io::Result<Option<LocalMetadata>> {
        match fs::symlink_metadata(path) {
            Ok(metadata) => {
                let kind = if metadata.is_dir() {
                    ObjectKind::Folder
                } else {
                    ObjectKind::File
                };
                Ok(Some(LocalMetadata {
                    kind,
                    len: if metadata.is_dir() { 0 } else { metadata.len() },
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        let uuid = self.tags.get(path)?;
        let tmp = temp_path(path);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(content)?;
            file.sync_all()?;
        }
        // The replaced file's tag must not outlive it
        self.tags.forget(path);
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            if let Some(uuid) = uuid {
                self.tags.set(path, uuid)?;
            }
            return Err(e);
        }
        if let Some(uuid) = uuid {
            self.tags.set(path, uuid)?;
        }
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if fs::symlink_metadata(to).is_ok() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.tags.forget(path);
        fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.forget_tree(path);
        fs::remove_dir_all(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn fingerprint(&self, path: &Path) -> io::Result<Fingerprint> {
        Fingerprint::of_file(path)
    }

    fn get_uuid(&self, path: &Path) -> io::Result<Option<Uuid>> {
        self.tags.get(path)
    }

    fn set_uuid(&self, path: &Path, uuid: Uuid) -> io::Result<bool> {
        self.tags.set(path, uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_replaces_content_and_keeps_uuid() {
        let dir = TempDir::new().unwrap();
        let fs = DiskFileSystem::with_sidecar();
        let path = dir.path().join("a.txt");

        fs.write(&path, b"one").unwrap();
        let uuid = Uuid::new_v4();
        assert!(fs.set_uuid(&path, uuid).unwrap());

        fs.write(&path, b"two").unwrap();
        assert_eq!(fs.read(&path).unwrap(), b"two");
        assert_eq!(fs.get_uuid(&path).unwrap(), Some(uuid));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn metadata_and_listing() {
        let dir = TempDir::new().unwrap();
        let fs = DiskFileSystem::with_sidecar();
        fs.create_dir(&dir.path().join("Cat")).unwrap();
        fs.write(&dir.path().join("b.txt"), b"12345").unwrap();

        let file = fs.metadata(&dir.path().join("b.txt")).unwrap().unwrap();
        assert_eq!(file.kind, ObjectKind::File);
        assert_eq!(file.len, 5);
        let folder = fs.metadata(&dir.path().join("Cat")).unwrap().unwrap();
        assert_eq!(folder.kind, ObjectKind::Folder);
        assert!(fs.metadata(&dir.path().join("nope")).unwrap().is_none());

        let names: Vec<_> = fs
            .list_dir(dir.path())
            .unwrap()
            .into_iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Cat", "b.txt"]);
    }

    #[test]
    fn rename_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let fs = DiskFileSystem::with_sidecar();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs.write(&a, b"a").unwrap();
        fs.write(&b, b"b").unwrap();

        let err = fs.rename(&a, &b).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        let moved = dir.path().join("Sub/c.txt");
        fs.rename(&a, &moved).unwrap();
        assert_eq!(fs.read(&moved).unwrap(), b"a");
    }
}
