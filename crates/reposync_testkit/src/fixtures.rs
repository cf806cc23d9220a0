//! Test fixtures and repository helpers.
//!
//! [`TestRepository`] wires a [`SyncSession`] to a temporary directory, a
//! [`MemoryRepository`] and an [`InMemoryStore`]. Local edits made through
//! it are reported to the session the way an OS watcher would.

use reposync_engine::{
    CycleReport, DiskFileSystem, LocalFileSystem, MemoryRepository, RetryConfig, SyncConfig,
    SyncResult, SyncSession, WatcherAdapter,
};
use reposync_events::{Fingerprint, FsEventKind, ObjectKind};
use reposync_store::{InMemoryStore, MetadataStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// One entry of a tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TreeEntry {
    /// A folder.
    Folder,
    /// A file and the fingerprint of its content.
    File {
        /// Hex SHA-256 of the content.
        fingerprint: String,
    },
}

impl TreeEntry {
    fn file(content: &[u8]) -> Self {
        TreeEntry::File {
            fingerprint: Fingerprint::of_bytes(content).as_str().to_string(),
        }
    }
}

/// Relative path (with `/` separators) to entry.
pub type TreeSnapshot = BTreeMap<String, TreeEntry>;

/// Configuration used by [`TestRepository`]: fail-fast handlers, no retry
/// back-off and no self-write window.
pub fn test_config(root: &Path) -> SyncConfig {
    SyncConfig::new(root)
        .with_retry(RetryConfig::no_retry())
        .with_swallow_handler_errors(false)
        .with_self_write_window(Duration::ZERO)
}

/// A synchronized repository with automatic cleanup.
pub struct TestRepository {
    /// The in-memory remote side.
    pub remote: Arc<MemoryRepository>,
    /// The identity store of the session.
    pub store: Arc<InMemoryStore>,
    local: Arc<DiskFileSystem>,
    session: SyncSession,
    watcher: WatcherAdapter,
    watch: bool,
    dir: TempDir,
}

impl Default for TestRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRepository {
    /// Creates a repository with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a repository, letting the caller adjust the configuration.
    pub fn with_config(configure: impl FnOnce(SyncConfig) -> SyncConfig) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let remote = Arc::new(MemoryRepository::new());
        let store = Arc::new(InMemoryStore::new());
        let local = Arc::new(DiskFileSystem::with_sidecar());
        let session = SyncSession::new(
            configure(test_config(dir.path())),
            remote.clone(),
            store.clone(),
            local.clone(),
        );
        let watcher = session.watcher();
        Self {
            remote,
            store,
            local,
            session,
            watcher,
            watch: true,
            dir,
        }
    }

    /// Stops reporting local edits, as if every watcher notification was
    /// lost. Only crawls see local changes afterwards.
    #[must_use]
    pub fn without_watcher(mut self) -> Self {
        self.watch = false;
        self
    }

    /// Local sync root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute local path of `relative`.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// The session under test.
    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    fn notify(&self, kind: FsEventKind, path: &Path) {
        if self.watch {
            self.watcher.notify(kind, path);
        }
    }

    /// Writes a local file, creating or replacing it.
    pub fn write_local(&self, relative: &str, content: &[u8]) {
        let path = self.path(relative);
        let kind = if path.exists() {
            FsEventKind::Changed
        } else {
            FsEventKind::Created
        };
        self.local
            .write(&path, content)
            .expect("Failed to write local file");
        self.notify(kind, &path);
    }

    /// Creates a local folder.
    pub fn mkdir_local(&self, relative: &str) {
        let path = self.path(relative);
        self.local
            .create_dir(&path)
            .expect("Failed to create local folder");
        self.notify(FsEventKind::Created, &path);
    }

    /// Renames or moves a local object.
    pub fn rename_local(&self, from: &str, to: &str) {
        let (from, to) = (self.path(from), self.path(to));
        self.local
            .rename(&from, &to)
            .expect("Failed to rename local object");
        if self.watch {
            self.watcher.notify_moved(&from, &to);
        }
    }

    /// Deletes a local file or folder.
    pub fn remove_local(&self, relative: &str) {
        let path = self.path(relative);
        let metadata = self
            .local
            .metadata(&path)
            .expect("Failed to stat local object")
            .expect("Local object does not exist");
        if metadata.kind.is_folder() {
            self.local
                .remove_dir_all(&path)
                .expect("Failed to remove local folder");
        } else {
            self.local
                .remove_file(&path)
                .expect("Failed to remove local file");
        }
        self.notify(FsEventKind::Deleted, &path);
    }

    /// Content of a local file, if it exists.
    pub fn read_local(&self, relative: &str) -> Option<Vec<u8>> {
        fs::read(self.path(relative)).ok()
    }

    /// Returns true if a local object exists.
    pub fn local_exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    /// Runs one cycle.
    ///
    /// # Errors
    ///
    /// Returns the first handler error; see [`SyncSession::sync_once`].
    pub fn try_sync(&self, full_crawl: bool) -> SyncResult<CycleReport> {
        self.session.sync_once(full_crawl)
    }

    /// Runs one incremental cycle (a crawl if no token is stored yet).
    pub fn sync(&self) -> CycleReport {
        self.try_sync(false).expect("Sync cycle failed")
    }

    /// Runs one full-crawl cycle.
    pub fn full_sync(&self) -> CycleReport {
        self.try_sync(true).expect("Full sync cycle failed")
    }

    /// Snapshot of the local tree.
    pub fn local_snapshot(&self) -> TreeSnapshot {
        let mut snapshot = TreeSnapshot::new();
        walk_local(self.root(), self.root(), &mut snapshot);
        snapshot
    }

    /// Snapshot of the remote tree.
    pub fn remote_snapshot(&self) -> TreeSnapshot {
        self.remote
            .list_tree()
            .into_iter()
            .map(|object| {
                let entry = match object.kind {
                    ObjectKind::Folder => TreeEntry::Folder,
                    ObjectKind::File => {
                        TreeEntry::file(&self.remote.content(&object.path).unwrap_or_default())
                    }
                };
                (object.path.trim_start_matches('/').to_string(), entry)
            })
            .collect()
    }

    /// Panics unless both trees are identical and every object has exactly
    /// one identity record at its current path.
    pub fn assert_converged(&self) {
        let local = self.local_snapshot();
        let remote = self.remote_snapshot();
        assert!(
            local == remote,
            "Trees differ\nlocal: {}\nremote: {}",
            pretty(&local),
            pretty(&remote)
        );

        let records = self.store.records().expect("Failed to list records");
        assert_eq!(
            records.len(),
            local.len(),
            "Expected one record per object, got {records:?}"
        );
        for record in records {
            let key = slash_path(&record.local_path);
            let remote = self
                .remote
                .find(&format!("/{key}"))
                .unwrap_or_else(|| panic!("No remote object at {key}"));
            assert_eq!(remote.id, record.remote_id, "Record of {key} is stale");
            assert_eq!(remote.name, record.name, "Record of {key} has a stale name");
        }
    }
}

fn walk_local(root: &Path, dir: &Path, snapshot: &mut TreeSnapshot) {
    let entries = fs::read_dir(dir).expect("Failed to list local folder");
    for entry in entries {
        let path = entry.expect("Failed to read folder entry").path();
        let relative = path.strip_prefix(root).expect("Path outside root");
        let key = slash_path(relative);
        if path.is_dir() {
            snapshot.insert(key, TreeEntry::Folder);
            walk_local(root, &path, snapshot);
        } else {
            let content = fs::read(&path).expect("Failed to read local file");
            snapshot.insert(key, TreeEntry::file(&content));
        }
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn pretty(snapshot: &TreeSnapshot) -> String {
    serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| format!("{snapshot:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_use_relative_slash_paths() {
        let repo = TestRepository::new();
        repo.mkdir_local("docs");
        repo.write_local("docs/a.txt", b"a");
        repo.remote.put_file("/docs/a.txt", b"a").unwrap();

        assert_eq!(repo.local_snapshot(), repo.remote_snapshot());
        assert_eq!(
            repo.local_snapshot().keys().collect::<Vec<_>>(),
            vec!["docs", "docs/a.txt"]
        );
    }

    #[test]
    fn empty_repository_is_converged() {
        let repo = TestRepository::new();
        repo.sync();
        repo.assert_converged();
    }
}
