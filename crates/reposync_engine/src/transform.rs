//! Handlers turning raw producer events into object events.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::queue::{EventSink, SyncEventHandler, PRIORITY_TRANSFORM};
use reposync_events::{
    ChangeType, ContentChangeEvent, FsEvent, FsEventKind, FsMovedEvent, ObjectEvent,
    RemoteChangeKind, SyncEvent,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Converts watcher notifications into object events.
///
/// The object kind comes from the filesystem, or from the identity record
/// when the path no longer exists. Deletions of paths the store never knew
/// are dropped.
#[derive(Debug)]
pub struct FsEventResolver {
    ctx: Arc<SyncContext>,
}

impl FsEventResolver {
    /// Creates the resolver.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    fn deleted(&self, path: &Path) -> SyncResult<Option<ObjectEvent>> {
        let Some(record) = self.ctx.find_record(None, Some(path), None)? else {
            debug!(path = %path.display(), "Deletion of unknown path, dropping");
            return Ok(None);
        };
        let mut object = ObjectEvent::from_local(record.kind, path, ChangeType::Deleted);
        object.remote_id = Some(record.remote_id);
        Ok(Some(object))
    }

    fn resolve_fs(&self, event: &FsEvent) -> SyncResult<Option<ObjectEvent>> {
        let metadata = match event.kind {
            FsEventKind::Deleted => None,
            _ => self.ctx.local().metadata(&event.path)?,
        };
        let Some(metadata) = metadata else {
            return self.deleted(&event.path);
        };
        let change = match event.kind {
            FsEventKind::Created => ChangeType::Created,
            _ => ChangeType::Changed,
        };
        Ok(Some(ObjectEvent::from_local(metadata.kind, &event.path, change)))
    }

    fn resolve_moved(&self, event: &FsMovedEvent) -> SyncResult<Option<ObjectEvent>> {
        match self.ctx.local().metadata(&event.new_path)? {
            Some(metadata) => Ok(Some(
                ObjectEvent::from_local(metadata.kind, &event.new_path, ChangeType::Moved)
                    .with_moved_from(&event.old_path),
            )),
            None => self.deleted(&event.old_path),
        }
    }
}

impl SyncEventHandler for FsEventResolver {
    fn name(&self) -> &'static str {
        "fs-event-resolver"
    }

    fn priority(&self) -> i32 {
        PRIORITY_TRANSFORM
    }

    fn handle(&self, event: &mut SyncEvent, _sink: &EventSink) -> SyncResult<bool> {
        let resolved = match event {
            SyncEvent::Fs(fs) => self.resolve_fs(fs)?,
            SyncEvent::FsMoved(moved) => self.resolve_moved(moved)?,
            _ => return Ok(false),
        };
        match resolved {
            Some(object) => {
                *event = SyncEvent::Object(object);
                Ok(false)
            }
            None => Ok(true),
        }
    }
}

/// Converts remote change-log entries into object events by fetching the
/// live object.
#[derive(Debug)]
pub struct ContentChangeResolver {
    ctx: Arc<SyncContext>,
}

impl ContentChangeResolver {
    /// Creates the resolver.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    fn absent(&self, change: &ContentChangeEvent) -> SyncResult<Option<ObjectEvent>> {
        match self.ctx.store().get(&change.remote_id)? {
            Some(record) => Ok(Some(
                ObjectEvent::new(record.kind).with_remote_absent(change.remote_id.clone()),
            )),
            None => {
                debug!(remote_id = %change.remote_id, "Removal of unknown object, dropping");
                Ok(None)
            }
        }
    }

    fn resolve(&self, change: &ContentChangeEvent) -> SyncResult<Option<ObjectEvent>> {
        if change.kind == RemoteChangeKind::Deleted {
            return self.absent(change);
        }
        match self.ctx.remote().get_object(&change.remote_id) {
            Ok(object) => {
                let paths = self.ctx.paths();
                if object.path == paths.remote_root() {
                    return Ok(None);
                }
                if !paths.is_in_scope(&object.path) {
                    debug!(remote_id = %object.id, path = %object.path, "Object left the synchronized tree");
                    return self.absent(change);
                }
                let kind = match change.kind {
                    RemoteChangeKind::Created => ChangeType::Created,
                    _ => ChangeType::Changed,
                };
                Ok(Some(ObjectEvent::from_remote(object, kind)))
            }
            Err(SyncError::NotFound { .. }) => self.absent(change),
            Err(e) => {
                warn!(remote_id = %change.remote_id, error = %e, "Cannot fetch changed object, deferring to a full crawl");
                self.ctx.request_full_crawl();
                if e.is_retryable() {
                    self.ctx.record(|recorder| recorder.retryable_failure = true);
                }
                Ok(None)
            }
        }
    }
}

impl SyncEventHandler for ContentChangeResolver {
    fn name(&self) -> &'static str {
        "content-change-resolver"
    }

    fn priority(&self) -> i32 {
        PRIORITY_TRANSFORM
    }

    fn handle(&self, event: &mut SyncEvent, _sink: &EventSink) -> SyncResult<bool> {
        let SyncEvent::ContentChange(change) = event else {
            return Ok(false);
        };
        match self.resolve(change)? {
            Some(object) => {
                *event = SyncEvent::Object(object);
                Ok(false)
            }
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::local::{DiskFileSystem, LocalFileSystem};
    use crate::queue::SyncEventQueue;
    use crate::remote::MemoryRepository;
    use reposync_events::{ObjectKind, RemoteState};
    use reposync_store::{IdentityRecord, InMemoryStore, MetadataStore};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        remote: Arc<MemoryRepository>,
        store: Arc<InMemoryStore>,
        ctx: Arc<SyncContext>,
        sink: EventSink,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MemoryRepository::new());
        let store = Arc::new(InMemoryStore::new());
        let ctx = Arc::new(SyncContext::new(
            SyncConfig::new(dir.path()),
            remote.clone(),
            store.clone(),
            Arc::new(DiskFileSystem::with_sidecar()),
        ));
        let sink = SyncEventQueue::new(false).sink();
        Fixture {
            dir,
            remote,
            store,
            ctx,
            sink,
        }
    }

    fn object(event: &SyncEvent) -> &ObjectEvent {
        match event {
            SyncEvent::Object(object) => object,
            other => panic!("expected object event, got {other:?}"),
        }
    }

    #[test]
    fn created_file_becomes_object_event() {
        let f = fixture();
        let path = f.dir.path().join("a.txt");
        f.ctx.local().write(&path, b"x").unwrap();

        let resolver = FsEventResolver::new(f.ctx.clone());
        let mut event = SyncEvent::Fs(FsEvent::new(FsEventKind::Created, &path));
        assert!(!resolver.handle(&mut event, &f.sink).unwrap());

        let object = object(&event);
        assert_eq!(object.kind, ObjectKind::File);
        assert_eq!(object.local_change, ChangeType::Created);
        assert_eq!(object.local(), Some(path.as_path()));
    }

    #[test]
    fn deletion_uses_record_kind_or_drops() {
        let f = fixture();
        f.store
            .save(IdentityRecord::folder("f-1", "Cat", "Cat").with_parent("root"))
            .unwrap();
        let resolver = FsEventResolver::new(f.ctx.clone());

        let mut known = SyncEvent::Fs(FsEvent::new(FsEventKind::Deleted, f.dir.path().join("Cat")));
        assert!(!resolver.handle(&mut known, &f.sink).unwrap());
        let object = object(&known);
        assert_eq!(object.kind, ObjectKind::Folder);
        assert_eq!(object.local_change, ChangeType::Deleted);
        assert_eq!(object.remote_id.as_ref().unwrap().as_str(), "f-1");

        let mut unknown =
            SyncEvent::Fs(FsEvent::new(FsEventKind::Deleted, f.dir.path().join("Dog")));
        assert!(resolver.handle(&mut unknown, &f.sink).unwrap());
    }

    #[test]
    fn move_to_missing_target_is_a_deletion() {
        let f = fixture();
        f.store
            .save(IdentityRecord::file("doc-1", "a.txt", "a.txt").with_parent("root"))
            .unwrap();
        let resolver = FsEventResolver::new(f.ctx.clone());

        let mut event = SyncEvent::FsMoved(FsMovedEvent::new(
            f.dir.path().join("a.txt"),
            f.dir.path().join("gone.txt"),
        ));
        assert!(!resolver.handle(&mut event, &f.sink).unwrap());
        assert_eq!(object(&event).local_change, ChangeType::Deleted);
    }

    #[test]
    fn remote_change_is_fetched() {
        let f = fixture();
        let id = f.remote.put_file("/a.txt", b"hello").unwrap();
        let resolver = ContentChangeResolver::new(f.ctx.clone());

        let mut event = SyncEvent::ContentChange(ContentChangeEvent {
            remote_id: id.clone(),
            kind: RemoteChangeKind::Created,
        });
        assert!(!resolver.handle(&mut event, &f.sink).unwrap());
        let object = object(&event);
        assert_eq!(object.remote_change, ChangeType::Created);
        assert_eq!(object.remote_object().unwrap().path, "/a.txt");
    }

    #[test]
    fn missing_remote_object_is_absent_when_known() {
        let f = fixture();
        f.store
            .save(IdentityRecord::file("doc-9", "a.txt", "a.txt").with_parent("root"))
            .unwrap();
        let resolver = ContentChangeResolver::new(f.ctx.clone());

        let mut known = SyncEvent::ContentChange(ContentChangeEvent {
            remote_id: "doc-9".into(),
            kind: RemoteChangeKind::Updated,
        });
        assert!(!resolver.handle(&mut known, &f.sink).unwrap());
        assert_eq!(object(&known).remote, RemoteState::Absent);

        let mut unknown = SyncEvent::ContentChange(ContentChangeEvent {
            remote_id: "doc-10".into(),
            kind: RemoteChangeKind::Deleted,
        });
        assert!(resolver.handle(&mut unknown, &f.sink).unwrap());
    }

    #[test]
    fn fetch_failure_requests_full_crawl() {
        let f = fixture();
        let id = f.remote.put_file("/a.txt", b"hello").unwrap();
        f.remote.set_offline(true);
        let resolver = ContentChangeResolver::new(f.ctx.clone());

        let mut event = SyncEvent::ContentChange(ContentChangeEvent {
            remote_id: id,
            kind: RemoteChangeKind::Updated,
        });
        assert!(resolver.handle(&mut event, &f.sink).unwrap());
        assert!(f.ctx.full_crawl_requested());
    }
}
