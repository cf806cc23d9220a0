//! Accumulators fill in the side of an object event its producer could
//! not provide.
//!
//! They only read the identity store; records are written by solvers.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::queue::{EventSink, SyncEventHandler, PRIORITY_ACCUMULATOR};
use reposync_events::{ChangeType, ObjectEvent, RemoteState, SyncEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Attaches the expected local path to remote-originated events and drops
/// events outside the synchronized, unfiltered tree.
#[derive(Debug)]
pub struct LocalAccumulator {
    ctx: Arc<SyncContext>,
}

impl LocalAccumulator {
    /// Creates the accumulator.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Returns the local path the event should use, or `None` to drop it.
    fn local_path(&self, event: &ObjectEvent) -> SyncResult<Option<PathBuf>> {
        if let Some(path) = event.local() {
            return Ok(Some(path.to_path_buf()));
        }
        if let Some(id) = event.effective_remote_id() {
            if let Some(record) = self.ctx.store().get(id)? {
                return Ok(Some(self.ctx.local_path_of(&record)));
            }
        }
        match &event.remote {
            RemoteState::Present(object) => Ok(self.ctx.paths().local_path_for_remote(&object.path)),
            _ => Ok(None),
        }
    }
}

impl SyncEventHandler for LocalAccumulator {
    fn name(&self) -> &'static str {
        "local-accumulator"
    }

    fn priority(&self) -> i32 {
        PRIORITY_ACCUMULATOR + 100
    }

    fn handle(&self, event: &mut SyncEvent, _sink: &EventSink) -> SyncResult<bool> {
        let SyncEvent::Object(object) = event else {
            return Ok(false);
        };
        let Some(path) = self.local_path(object)? else {
            debug!(event = %object, "No local counterpart, dropping");
            return Ok(true);
        };
        let Some(relative) = self.ctx.paths().relative(&path) else {
            debug!(path = %path.display(), "Path outside the sync root, dropping");
            return Ok(true);
        };
        if self.ctx.is_ignored(&relative) {
            debug!(path = %relative.display(), "Path is filtered, dropping");
            return Ok(true);
        }
        if object.local_path.is_none() {
            object.local_path = Some(path);
        }
        Ok(false)
    }
}

/// Looks up and fetches the remote object of local-originated events.
///
/// A remote "not found" marks the remote side absent. Other failures are
/// logged and leave the remote side unknown; the detector then defers the
/// event to the next full crawl.
#[derive(Debug)]
pub struct RemoteAccumulator {
    ctx: Arc<SyncContext>,
}

impl RemoteAccumulator {
    /// Creates the accumulator.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    fn accumulate(&self, event: &mut ObjectEvent) -> SyncResult<()> {
        let moved_from = event.moved_from.as_ref().map(|moved| moved.local_path.clone());
        let record = self.ctx.find_record(
            event.remote_id.as_ref(),
            event.local(),
            moved_from.as_deref(),
        )?;

        match record {
            Some(record) => {
                event.remote_id = Some(record.remote_id.clone());
                match self.ctx.remote().get_object(&record.remote_id) {
                    Ok(object) if self.ctx.paths().is_in_scope(&object.path) => {
                        event.remote = RemoteState::Present(object);
                    }
                    Ok(_) | Err(SyncError::NotFound { .. }) => {
                        event.remote = RemoteState::Absent;
                        event.remote_change = ChangeType::Deleted;
                    }
                    Err(e) => self.fetch_failed(event, e),
                }
            }
            None => {
                let Some(relative) = event.local().and_then(|path| self.ctx.paths().relative(path))
                else {
                    return Ok(());
                };
                let remote_path = self.ctx.paths().remote_path_for_local(&relative);
                match self.ctx.remote().get_object_by_path(&remote_path) {
                    Ok(object) if self.ctx.store().get(&object.id)?.is_none() => {
                        event.remote_id = Some(object.id.clone());
                        event.remote = RemoteState::Present(object);
                    }
                    // Taken by another record: not this object's counterpart
                    Ok(_) | Err(SyncError::NotFound { .. }) => {
                        event.remote = RemoteState::Absent;
                    }
                    Err(e) => self.fetch_failed(event, e),
                }
            }
        }
        Ok(())
    }

    fn fetch_failed(&self, event: &ObjectEvent, error: SyncError) {
        warn!(event = %event, error = %error, "Cannot fetch remote object, deferring");
        if error.is_retryable() {
            self.ctx.record(|recorder| recorder.retryable_failure = true);
        }
        self.ctx.request_full_crawl();
    }
}

impl SyncEventHandler for RemoteAccumulator {
    fn name(&self) -> &'static str {
        "remote-accumulator"
    }

    fn priority(&self) -> i32 {
        PRIORITY_ACCUMULATOR
    }

    fn handle(&self, event: &mut SyncEvent, _sink: &EventSink) -> SyncResult<bool> {
        let SyncEvent::Object(object) = event else {
            return Ok(false);
        };
        if object.remote.is_unknown() {
            self.accumulate(object)?;
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::ignore::IgnoreRules;
    use crate::local::{DiskFileSystem, LocalFileSystem};
    use crate::queue::SyncEventQueue;
    use crate::remote::{MemoryRepository, RemoteRepository};
    use reposync_events::ObjectKind;
    use reposync_store::{IdentityRecord, InMemoryStore, MetadataStore};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<MemoryRepository>, Arc<InMemoryStore>, Arc<SyncContext>) {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MemoryRepository::new());
        let store = Arc::new(InMemoryStore::new());
        let config = SyncConfig::new(dir.path()).with_ignore(IgnoreRules::default());
        let ctx = Arc::new(SyncContext::new(
            config,
            remote.clone(),
            store.clone(),
            Arc::new(DiskFileSystem::with_sidecar()),
        ));
        (dir, remote, store, ctx)
    }

    fn sink() -> EventSink {
        SyncEventQueue::new(false).sink()
    }

    #[test]
    fn local_accumulator_maps_new_remote_objects() {
        let (dir, remote, _store, ctx) = setup();
        remote.put_file("/Cat/kitten.txt", b"meow").unwrap();
        let object = remote.find("/Cat/kitten.txt").unwrap();

        let mut event = SyncEvent::Object(ObjectEvent::from_remote(object, ChangeType::Created));
        assert!(!LocalAccumulator::new(ctx).handle(&mut event, &sink()).unwrap());
        let SyncEvent::Object(object) = event else { unreachable!() };
        assert_eq!(object.local_path, Some(dir.path().join("Cat/kitten.txt")));
    }

    #[test]
    fn local_accumulator_prefers_record_location() {
        let (dir, remote, store, ctx) = setup();
        let id = remote.put_file("/Dog", b"").unwrap();
        store
            .save(IdentityRecord::file(id.clone(), "Cat", "Cat").with_parent("root"))
            .unwrap();

        let object = remote.get_object(&id).unwrap();
        let mut event = SyncEvent::Object(ObjectEvent::from_remote(object, ChangeType::Changed));
        LocalAccumulator::new(ctx).handle(&mut event, &sink()).unwrap();
        let SyncEvent::Object(object) = event else { unreachable!() };
        assert_eq!(object.local_path, Some(dir.path().join("Cat")));
    }

    #[test]
    fn local_accumulator_drops_filtered_paths() {
        let (dir, _remote, _store, ctx) = setup();
        let mut event = SyncEvent::Object(ObjectEvent::from_local(
            ObjectKind::File,
            dir.path().join("notes.swp"),
            ChangeType::Created,
        ));
        assert!(LocalAccumulator::new(ctx).handle(&mut event, &sink()).unwrap());
    }

    #[test]
    fn remote_accumulator_marks_missing_objects_absent() {
        let (dir, _remote, store, ctx) = setup();
        store
            .save(IdentityRecord::file("obj-404", "a.txt", "a.txt").with_parent("root"))
            .unwrap();

        let mut event = SyncEvent::Object(ObjectEvent::from_local(
            ObjectKind::File,
            dir.path().join("a.txt"),
            ChangeType::Changed,
        ));
        RemoteAccumulator::new(ctx).handle(&mut event, &sink()).unwrap();
        let SyncEvent::Object(object) = event else { unreachable!() };
        assert_eq!(object.remote, RemoteState::Absent);
        assert_eq!(object.remote_id.unwrap().as_str(), "obj-404");
    }

    #[test]
    fn remote_accumulator_finds_unrecorded_objects_by_path() {
        let (dir, remote, store, ctx) = setup();
        remote.put_file("/a.txt", b"remote").unwrap();
        ctx.local().write(&dir.path().join("a.txt"), b"local").unwrap();

        let mut event = SyncEvent::Object(ObjectEvent::from_local(
            ObjectKind::File,
            dir.path().join("a.txt"),
            ChangeType::Created,
        ));
        RemoteAccumulator::new(ctx).handle(&mut event, &sink()).unwrap();
        let SyncEvent::Object(object) = event else { unreachable!() };
        assert_eq!(object.remote_object().unwrap().path, "/a.txt");
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn remote_accumulator_swallows_transport_errors() {
        let (dir, remote, store, ctx) = setup();
        let id = remote.put_file("/a.txt", b"x").unwrap();
        store
            .save(IdentityRecord::file(id, "a.txt", "a.txt").with_parent("root"))
            .unwrap();
        remote.set_offline(true);

        let mut event = SyncEvent::Object(ObjectEvent::from_local(
            ObjectKind::File,
            dir.path().join("a.txt"),
            ChangeType::Changed,
        ));
        assert!(!RemoteAccumulator::new(ctx.clone())
            .handle(&mut event, &sink())
            .unwrap());
        let SyncEvent::Object(object) = event else { unreachable!() };
        assert!(object.remote.is_unknown());
        assert!(ctx.full_crawl_requested());
    }
}
