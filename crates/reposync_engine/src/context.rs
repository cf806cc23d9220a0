//! State shared by the handlers of one synchronized repository.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::local::LocalFileSystem;
use crate::path_map::PathMapper;
use crate::remote::RemoteRepository;
use crate::self_write::SelfWriteFilter;
use parking_lot::Mutex;
use reposync_events::RemoteId;
use reposync_store::{IdentityRecord, MetadataStore};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Everything a handler needs: the collaborators, the path mapping and the
/// per-cycle bookkeeping.
///
/// Collaborators are injected; nothing here is process-global.
pub struct SyncContext {
    config: SyncConfig,
    remote: Arc<dyn RemoteRepository>,
    store: Arc<dyn MetadataStore>,
    local: Arc<dyn LocalFileSystem>,
    paths: PathMapper,
    self_writes: Arc<SelfWriteFilter>,
    force_full_crawl: AtomicBool,
    suspended: AtomicBool,
    recorder: Mutex<CycleRecorder>,
    remote_root: Mutex<Option<RemoteId>>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("local_root", &self.paths.local_root())
            .field("remote_root", &self.paths.remote_root())
            .field("suspended", &self.is_suspended())
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Creates a context.
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteRepository>,
        store: Arc<dyn MetadataStore>,
        local: Arc<dyn LocalFileSystem>,
    ) -> Self {
        let paths = PathMapper::new(config.local_root.clone(), &config.remote_root);
        remote.set_request_timeout(config.request_timeout);
        let self_writes = Arc::new(SelfWriteFilter::new(config.self_write_window));
        Self {
            config,
            remote,
            store,
            local,
            paths,
            self_writes,
            force_full_crawl: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            recorder: Mutex::new(CycleRecorder::default()),
            remote_root: Mutex::new(None),
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Remote repository client.
    pub fn remote(&self) -> &dyn RemoteRepository {
        self.remote.as_ref()
    }

    /// Identity store.
    pub fn store(&self) -> &dyn MetadataStore {
        self.store.as_ref()
    }

    /// Local filesystem.
    pub fn local(&self) -> &dyn LocalFileSystem {
        self.local.as_ref()
    }

    /// Path mapping between the two roots.
    pub fn paths(&self) -> &PathMapper {
        &self.paths
    }

    /// Filter of engine-caused watcher notifications.
    pub fn self_writes(&self) -> &Arc<SelfWriteFilter> {
        &self.self_writes
    }

    /// Absolute local path of a record.
    pub fn local_path_of(&self, record: &IdentityRecord) -> PathBuf {
        self.paths.absolute(&record.local_path)
    }

    /// Returns true if the relative path is filtered out.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        self.config.ignore.is_ignored(relative)
    }

    /// Asks the next cycle to crawl instead of polling.
    pub fn request_full_crawl(&self) {
        self.force_full_crawl.store(true, Ordering::SeqCst);
    }

    /// Consumes a pending full-crawl request.
    pub fn take_full_crawl_request(&self) -> bool {
        self.force_full_crawl.swap(false, Ordering::SeqCst)
    }

    /// Returns true if a full crawl has been requested.
    pub fn full_crawl_requested(&self) -> bool {
        self.force_full_crawl.load(Ordering::SeqCst)
    }

    pub(crate) fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::SeqCst);
    }

    /// Returns true while the session is suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Fails with [`SyncError::Suspended`] while the session is suspended.
    pub fn check_active(&self) -> SyncResult<()> {
        if self.is_suspended() {
            Err(SyncError::Suspended)
        } else {
            Ok(())
        }
    }

    /// Identifier of the remote root folder, looked up once.
    pub fn remote_root_id(&self) -> SyncResult<RemoteId> {
        let mut cached = self.remote_root.lock();
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }
        let root = self.remote.get_object_by_path(self.paths.remote_root())?;
        *cached = Some(root.id.clone());
        Ok(root.id)
    }

    /// Finds the record an object event refers to.
    ///
    /// Looks up, in order: the remote identifier, the path the object was
    /// moved from, the local UUID of the current path and finally the
    /// current path itself.
    pub fn find_record(
        &self,
        remote_id: Option<&RemoteId>,
        local: Option<&Path>,
        moved_from: Option<&Path>,
    ) -> SyncResult<Option<IdentityRecord>> {
        if let Some(id) = remote_id {
            if let Some(record) = self.store.get(id)? {
                return Ok(Some(record));
            }
        }
        if let Some(relative) = moved_from.and_then(|path| self.paths.relative(path)) {
            if let Some(record) = self.store.get_by_local_path(&relative)? {
                return Ok(Some(record));
            }
        }
        let Some(local) = local else {
            return Ok(None);
        };
        if let Some(uuid) = self.local_uuid(local) {
            if let Some(record) = self.store.get_by_local_uuid(&uuid)? {
                return Ok(Some(record));
            }
        }
        match self.paths.relative(local) {
            Some(relative) => Ok(self.store.get_by_local_path(&relative)?),
            None => Ok(None),
        }
    }

    fn local_uuid(&self, path: &Path) -> Option<Uuid> {
        match self.local.get_uuid(path) {
            Ok(uuid) => uuid,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Cannot read local uuid");
                None
            }
        }
    }

    /// Runs `f` with the current cycle's recorder.
    pub fn record<R>(&self, f: impl FnOnce(&mut CycleRecorder) -> R) -> R {
        f(&mut self.recorder.lock())
    }

    /// Returns the recorder's contents and starts a fresh one.
    pub fn take_recorder(&self) -> CycleRecorder {
        std::mem::take(&mut *self.recorder.lock())
    }
}

/// Bookkeeping of one cycle, filled by the mechanism and read at the
/// cycle marker.
#[derive(Debug, Clone, Default)]
pub struct CycleRecorder {
    /// Object events that reached the mechanism.
    pub events_processed: u64,
    /// Solver runs by solver name (no-ops excluded).
    pub solver_invocations: BTreeMap<String, u64>,
    /// Surfaced solver failures.
    pub failures: Vec<String>,
    /// Non-fatal problems (permission denied and the like).
    pub warnings: Vec<String>,
    /// Conflicts the engine refused to resolve.
    pub unresolved: Vec<String>,
    /// Whether a retryable failure happened; the token is then kept.
    pub retryable_failure: bool,
    /// Objects left unresolved; later events for them are skipped until the
    /// cycle ends.
    pub held: BTreeSet<RemoteId>,
}

impl CycleRecorder {
    /// Counts one solver run.
    pub fn solver_ran(&mut self, name: &str) {
        *self.solver_invocations.entry(name.to_string()).or_default() += 1;
    }

    /// Total solver runs.
    pub fn total_invocations(&self) -> u64 {
        self.solver_invocations.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::DiskFileSystem;
    use crate::remote::MemoryRepository;
    use reposync_store::InMemoryStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> (SyncContext, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let ctx = SyncContext::new(
            SyncConfig::new(dir.path()),
            Arc::new(MemoryRepository::new()),
            store.clone(),
            Arc::new(DiskFileSystem::with_sidecar()),
        );
        (ctx, store)
    }

    #[test]
    fn find_record_lookup_order() {
        let dir = TempDir::new().unwrap();
        let (ctx, store) = context(&dir);
        store
            .save(IdentityRecord::file("doc-1", "a.txt", "a.txt").with_parent("root"))
            .unwrap();
        store
            .save(IdentityRecord::file("doc-2", "b.txt", "b.txt").with_parent("root"))
            .unwrap();

        let by_id = ctx
            .find_record(Some(&RemoteId::new("doc-2")), Some(&dir.path().join("a.txt")), None)
            .unwrap()
            .unwrap();
        assert_eq!(by_id.remote_id.as_str(), "doc-2");

        let by_old_path = ctx
            .find_record(None, Some(&dir.path().join("c.txt")), Some(&dir.path().join("a.txt")))
            .unwrap()
            .unwrap();
        assert_eq!(by_old_path.remote_id.as_str(), "doc-1");

        let by_path = ctx
            .find_record(None, Some(&dir.path().join("b.txt")), None)
            .unwrap()
            .unwrap();
        assert_eq!(by_path.remote_id.as_str(), "doc-2");

        assert!(ctx
            .find_record(None, Some(&dir.path().join("zzz.txt")), None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn request_timeout_reaches_the_remote() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MemoryRepository::new());
        remote.set_latency(Duration::from_secs(2));
        let ctx = SyncContext::new(
            SyncConfig::new(dir.path()).with_request_timeout(Duration::from_secs(1)),
            remote.clone(),
            Arc::new(InMemoryStore::new()),
            Arc::new(DiskFileSystem::with_sidecar()),
        );

        assert!(matches!(ctx.remote_root_id(), Err(SyncError::Timeout)));
        remote.set_latency(Duration::from_millis(10));
        assert_eq!(ctx.remote_root_id().unwrap(), remote.root_id());
    }

    #[test]
    fn full_crawl_request_is_consumed_once() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(&dir);
        assert!(!ctx.take_full_crawl_request());
        ctx.request_full_crawl();
        assert!(ctx.full_crawl_requested());
        assert!(ctx.take_full_crawl_request());
        assert!(!ctx.take_full_crawl_request());
    }

    #[test]
    fn remote_root_is_cached() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MemoryRepository::new());
        let ctx = SyncContext::new(
            SyncConfig::new(dir.path()),
            remote.clone(),
            Arc::new(InMemoryStore::new()),
            Arc::new(DiskFileSystem::with_sidecar()),
        );
        assert_eq!(ctx.remote_root_id().unwrap(), remote.root_id());
        let calls = remote.call_count();
        ctx.remote_root_id().unwrap();
        assert_eq!(remote.call_count(), calls);
    }

    #[test]
    fn suspension_is_checked() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(&dir);
        assert!(ctx.check_active().is_ok());
        ctx.set_suspended(true);
        assert!(matches!(ctx.check_active(), Err(SyncError::Suspended)));
    }
}
