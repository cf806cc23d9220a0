//! Full-tree comparison of both sides against the identity store.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::local::LocalMetadata;
use crate::retry::with_retry;
use reposync_events::{ChangeType, ObjectEvent, RemoteId, RemoteObject, SyncEvent};
use reposync_store::IdentityRecord;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

/// Result of a completed crawl.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    /// One event per object whose live state differs from its record,
    /// parents before children.
    pub events: Vec<SyncEvent>,
    /// Change-log token taken before the walk started.
    pub token: String,
}

/// Walks the remote subtree and the local tree and emits events for every
/// difference from the identity store, deletions included.
///
/// Each crawl runs under a generation number. A new full-crawl request
/// bumps the generation; a running crawl notices between folder visits and
/// stops with [`SyncError::Cancelled`], discarding what it gathered.
#[derive(Debug, Default)]
pub struct Crawler {
    generation: AtomicU64,
}

struct Walk<'a> {
    ctx: &'a SyncContext,
    crawler: &'a Crawler,
    generation: u64,
}

impl Walk<'_> {
    fn check(&self) -> SyncResult<()> {
        if self.crawler.generation.load(Ordering::SeqCst) != self.generation {
            return Err(SyncError::Cancelled);
        }
        self.ctx.check_active()
    }

    fn remote_tree(&self) -> SyncResult<Vec<RemoteObject>> {
        let ctx = self.ctx;
        let retry = &ctx.config().retry;
        let root = with_retry(retry, "get_root", || ctx.remote_root_id())?;

        let mut objects = Vec::new();
        let mut pending = VecDeque::from([root]);
        while let Some(folder) = pending.pop_front() {
            self.check()?;
            let children = with_retry(retry, "get_children", || ctx.remote().get_children(&folder))?;
            for child in children {
                let Some(relative) = ctx.paths().relative_for_remote(&child.path) else {
                    continue;
                };
                if ctx.is_ignored(&relative) {
                    continue;
                }
                if child.is_folder() {
                    pending.push_back(child.id.clone());
                }
                objects.push(child);
            }
        }
        Ok(objects)
    }

    fn local_tree(&self) -> SyncResult<BTreeMap<PathBuf, LocalMetadata>> {
        let ctx = self.ctx;
        let root = ctx.paths().local_root();
        let mut entries = BTreeMap::new();
        if ctx.local().metadata(root)?.is_none() {
            ctx.local().create_dir(root)?;
            return Ok(entries);
        }

        let mut pending = VecDeque::from([root.to_path_buf()]);
        while let Some(folder) = pending.pop_front() {
            self.check()?;
            for child in ctx.local().list_dir(&folder)? {
                let Some(relative) = ctx.paths().relative(&child) else {
                    continue;
                };
                if ctx.is_ignored(&relative) {
                    continue;
                }
                let Some(metadata) = ctx.local().metadata(&child)? else {
                    continue;
                };
                if metadata.kind.is_folder() {
                    pending.push_back(child);
                }
                entries.insert(relative, metadata);
            }
        }
        Ok(entries)
    }
}

/// Local UUIDs of the walked tree, built on first use.
struct UuidIndex<'a> {
    ctx: &'a SyncContext,
    index: Option<HashMap<Uuid, PathBuf>>,
}

impl UuidIndex<'_> {
    fn find(
        &mut self,
        uuid: &Uuid,
        local: &BTreeMap<PathBuf, LocalMetadata>,
    ) -> SyncResult<Option<PathBuf>> {
        if self.index.is_none() {
            let mut index = HashMap::new();
            for relative in local.keys() {
                if let Some(uuid) = self.ctx.local().get_uuid(&self.ctx.paths().absolute(relative))? {
                    index.insert(uuid, relative.clone());
                }
            }
            self.index = Some(index);
        }
        Ok(self.index.as_ref().and_then(|index| index.get(uuid).cloned()))
    }
}

fn remote_differs(record: &IdentityRecord, object: &RemoteObject) -> bool {
    object.parent_id != record.parent_remote_id
        || object.name != record.name
        || record.change_token.as_deref() != Some(object.change_token.as_str())
}

impl Crawler {
    /// Creates a crawler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the crawl in progress, if any. Returns the new generation.
    pub fn request_full_crawl(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Runs a crawl.
    ///
    /// # Errors
    ///
    /// [`SyncError::Cancelled`] if a newer request arrived,
    /// [`SyncError::Suspended`] if the session was paused, or the remote or
    /// local error that stopped the walk.
    pub fn crawl(&self, ctx: &SyncContext) -> SyncResult<CrawlOutcome> {
        let walk = Walk {
            ctx,
            crawler: self,
            generation: self.generation(),
        };
        walk.check()?;
        let token = with_retry(&ctx.config().retry, "latest_change_token", || {
            ctx.remote().latest_change_token()
        })?;
        let remote = walk.remote_tree()?;
        let local = walk.local_tree()?;
        walk.check()?;

        let events = compare(ctx, &walk, &remote, &local)?;
        info!(
            remote_objects = remote.len(),
            local_entries = local.len(),
            events = events.len(),
            "Crawl finished"
        );
        Ok(CrawlOutcome { events, token })
    }
}

fn compare(
    ctx: &SyncContext,
    walk: &Walk<'_>,
    remote: &[RemoteObject],
    local: &BTreeMap<PathBuf, LocalMetadata>,
) -> SyncResult<Vec<SyncEvent>> {
    let paths = ctx.paths();
    let remote_by_id: HashMap<&RemoteId, &RemoteObject> =
        remote.iter().map(|object| (&object.id, object)).collect();
    let mut uuids = UuidIndex { ctx, index: None };
    let mut claimed_local: HashSet<PathBuf> = HashSet::new();
    let mut claimed_remote: HashSet<RemoteId> = HashSet::new();
    let mut keyed: Vec<(PathBuf, ObjectEvent)> = Vec::new();

    for record in ctx.store().records()? {
        walk.check()?;
        claimed_remote.insert(record.remote_id.clone());
        let object = remote_by_id.get(&record.remote_id).copied();

        let (current, moved) = if local.contains_key(&record.local_path) {
            (Some(record.local_path.clone()), false)
        } else {
            match &record.local_uuid {
                Some(uuid) => (uuids.find(uuid, local)?, true),
                None => (None, false),
            }
        };
        if let Some(current) = &current {
            claimed_local.insert(current.clone());
        }

        let local_changed = match (&current, moved) {
            (Some(current), false) => {
                record.kind.is_file()
                    && record.fingerprint.as_ref()
                        != Some(&ctx.local().fingerprint(&paths.absolute(current))?)
            }
            _ => true,
        };
        let remote_changed = object.map_or(true, |object| remote_differs(&record, object));
        if !local_changed && !remote_changed {
            continue;
        }

        let recorded_at = paths.absolute(&record.local_path);
        let mut event = match object {
            Some(object) => ObjectEvent::from_remote(
                object.clone(),
                if remote_changed { ChangeType::Changed } else { ChangeType::None },
            ),
            None => ObjectEvent::new(record.kind).with_remote_absent(record.remote_id.clone()),
        };
        event = match (&current, moved) {
            (Some(current), true) => event
                .with_local(paths.absolute(current), ChangeType::Moved)
                .with_moved_from(recorded_at),
            (Some(current), false) => event.with_local(
                paths.absolute(current),
                if local_changed { ChangeType::Changed } else { ChangeType::None },
            ),
            (None, _) => event.with_local(recorded_at, ChangeType::Deleted),
        };

        let key = object
            .and_then(|object| paths.relative_for_remote(&object.path))
            .or(current)
            .unwrap_or_else(|| record.local_path.clone());
        debug!(event = %event, "Crawl found difference");
        keyed.push((key, event));
    }

    for object in remote {
        if claimed_remote.contains(&object.id) {
            continue;
        }
        let Some(relative) = paths.relative_for_remote(&object.path) else {
            continue;
        };
        let mut event = ObjectEvent::from_remote(object.clone(), ChangeType::Created);
        if local.contains_key(&relative) && claimed_local.insert(relative.clone()) {
            event = event.with_local(paths.absolute(&relative), ChangeType::Created);
        }
        keyed.push((relative, event));
    }

    for (relative, metadata) in local {
        if claimed_local.contains(relative) {
            continue;
        }
        let event = ObjectEvent::from_local(
            metadata.kind,
            paths.absolute(relative),
            ChangeType::Created,
        );
        keyed.push((relative.clone(), event));
    }

    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyed
        .into_iter()
        .map(|(_, event)| SyncEvent::Object(event))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, SyncConfig};
    use crate::local::{DiskFileSystem, LocalFileSystem};
    use crate::remote::{MemoryRepository, RemoteRepository};
    use reposync_events::{Fingerprint, RemoteState};
    use reposync_store::{InMemoryStore, MetadataStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        remote: Arc<MemoryRepository>,
        store: Arc<InMemoryStore>,
        ctx: SyncContext,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MemoryRepository::new());
        let store = Arc::new(InMemoryStore::new());
        let ctx = SyncContext::new(
            SyncConfig::new(dir.path()).with_retry(RetryConfig::no_retry()),
            remote.clone(),
            store.clone(),
            Arc::new(DiskFileSystem::with_sidecar()),
        );
        Fixture {
            dir,
            remote,
            store,
            ctx,
        }
    }

    fn objects(outcome: &CrawlOutcome) -> Vec<&ObjectEvent> {
        outcome
            .events
            .iter()
            .map(|event| match event {
                SyncEvent::Object(object) => object,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn new_objects_on_both_sides() {
        let f = fixture();
        f.remote.put_file("/Cat/kitten.txt", b"meow").unwrap();
        f.ctx.local().write(&f.dir.path().join("local.txt"), b"x").unwrap();

        let outcome = Crawler::new().crawl(&f.ctx).unwrap();
        let events = objects(&outcome);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].remote_object().unwrap().path, "/Cat");
        assert_eq!(events[1].remote_object().unwrap().path, "/Cat/kitten.txt");
        assert_eq!(events[2].local(), Some(f.dir.path().join("local.txt").as_path()));
        assert!(events[2].remote.is_unknown());
        assert_eq!(outcome.token, f.remote.current_token());
    }

    #[test]
    fn same_path_on_both_sides_is_one_event() {
        let f = fixture();
        f.remote.put_file("/a.txt", b"remote").unwrap();
        f.ctx.local().write(&f.dir.path().join("a.txt"), b"local").unwrap();

        let outcome = Crawler::new().crawl(&f.ctx).unwrap();
        let events = objects(&outcome);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].local_change, ChangeType::Created);
        assert_eq!(events[0].remote_change, ChangeType::Created);
    }

    #[test]
    fn synchronized_objects_produce_nothing() {
        let f = fixture();
        let id = f.remote.put_file("/a.txt", b"same").unwrap();
        let object = f.remote.get_object(&id).unwrap();
        f.ctx.local().write(&f.dir.path().join("a.txt"), b"same").unwrap();
        f.store
            .save(
                IdentityRecord::file(id, "a.txt", "a.txt")
                    .with_parent(object.parent_id.unwrap())
                    .with_change_token(object.change_token)
                    .with_fingerprint(Fingerprint::of_bytes(b"same")),
            )
            .unwrap();

        let outcome = Crawler::new().crawl(&f.ctx).unwrap();
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn deletions_and_moves_are_inferred() {
        let f = fixture();
        let gone = f.remote.put_file("/gone.txt", b"g").unwrap();
        let moved = f.remote.put_file("/moved.txt", b"m").unwrap();
        for (id, name, content) in [(&gone, "gone.txt", b"g"), (&moved, "moved.txt", b"m")] {
            let object = f.remote.get_object(id).unwrap();
            let path = f.dir.path().join(name);
            f.ctx.local().write(&path, content).unwrap();
            let uuid = Uuid::new_v4();
            f.ctx.local().set_uuid(&path, uuid).unwrap();
            f.store
                .save(
                    IdentityRecord::file(id.clone(), name, name)
                        .with_parent(object.parent_id.unwrap())
                        .with_change_token(object.change_token)
                        .with_uuid(uuid)
                        .with_fingerprint(Fingerprint::of_bytes(content)),
                )
                .unwrap();
        }
        f.remote.remove("/gone.txt").unwrap();
        f.ctx
            .local()
            .rename(&f.dir.path().join("moved.txt"), &f.dir.path().join("Sub/moved.txt"))
            .unwrap();

        let outcome = Crawler::new().crawl(&f.ctx).unwrap();
        let events = objects(&outcome);
        assert_eq!(events.len(), 3);

        let absent = events
            .iter()
            .find(|event| event.remote == RemoteState::Absent)
            .unwrap();
        assert_eq!(absent.remote_id.as_ref(), Some(&gone));

        let relocated = events
            .iter()
            .find(|event| event.local_change == ChangeType::Moved)
            .unwrap();
        assert_eq!(relocated.local(), Some(f.dir.path().join("Sub/moved.txt").as_path()));
        assert_eq!(
            relocated.moved_from.as_ref().unwrap().local_path,
            f.dir.path().join("moved.txt")
        );

        // The new local folder holding the moved file
        assert!(events
            .iter()
            .any(|event| event.local() == Some(f.dir.path().join("Sub").as_path())));
    }

    #[test]
    fn newer_request_cancels_running_crawl() {
        let f = fixture();
        let crawler = Crawler::new();
        let walk = Walk {
            ctx: &f.ctx,
            crawler: &crawler,
            generation: crawler.generation(),
        };
        assert!(walk.check().is_ok());
        crawler.request_full_crawl();
        assert!(matches!(walk.check(), Err(SyncError::Cancelled)));
    }
}
