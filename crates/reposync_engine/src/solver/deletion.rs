//! Propagation of deletions, and the cases where a change outlives one.

use super::actions::{
    download, forget, has_unsynced_content, local_content_changed, queue_remote_children,
    remote_content_changed, remote_has_unsynced_content, remove_local, save_record,
    upload_new,
};
use super::{current_local, record_of, remote_of, Solver};
use crate::context::SyncContext;
use crate::detector::Classification;
use crate::error::{SyncError, SyncResult};
use crate::queue::EventSink;
use reposync_events::{
    FsEvent, FsEventKind, ObjectEvent, ObjectKind, RemoteObject, Situation,
};
use reposync_store::IdentityRecord;
use std::path::PathBuf;
use tracing::info;

fn mapped_local(ctx: &SyncContext, object: &RemoteObject) -> SyncResult<PathBuf> {
    ctx.paths()
        .local_path_for_remote(&object.path)
        .ok_or_else(|| SyncError::InvalidEvent(format!("{} is outside the sync root", object.path)))
}

/// Recreates a remote object locally after its local copy was removed.
/// Records below a folder are dropped and the remote children queued again
/// as new objects.
fn restore_locally(
    ctx: &SyncContext,
    record: &IdentityRecord,
    remote: &RemoteObject,
    sink: &EventSink,
) -> SyncResult<()> {
    let local = mapped_local(ctx, remote)?;
    if record.is_folder() {
        forget(ctx, record)?;
    }
    download(ctx, remote, &local)?;
    save_record(ctx, remote, &local)?;
    if remote.is_folder() {
        queue_remote_children(ctx, &remote.id, sink)?;
    }
    info!(remote_id = %remote.id, path = %local.display(), "Remote change outlived local deletion");
    Ok(())
}

/// `(REMOVED, NONE)` and `(REMOVED, MOVED|RENAMED)`: deletes the remote
/// object, unless its content changed since the last sync.
///
/// A remote folder that gained objects or changed files below it is
/// restored locally instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalObjectDeletedSolver;

impl Solver for LocalObjectDeletedSolver {
    fn name(&self) -> &'static str {
        "delete-remote"
    }

    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        sink: &EventSink,
    ) -> SyncResult<()> {
        let record = record_of(found, event)?;
        let remote = remote_of(found, event)?;

        let outlived = match remote.kind {
            ObjectKind::File => remote_content_changed(record, remote),
            ObjectKind::Folder => remote_has_unsynced_content(ctx, &remote.id)?,
        };
        if outlived {
            return restore_locally(ctx, record, remote, sink);
        }

        let expected = if found.pair.remote == Situation::None {
            record.change_token.as_deref()
        } else {
            Some(remote.change_token.as_str())
        };
        match ctx.remote().delete(&record.remote_id, expected) {
            Ok(()) | Err(SyncError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        info!(remote_id = %record.remote_id, path = %record.local_path.display(), "Deleted remote object");
        forget(ctx, record)
    }
}

/// `(NONE, REMOVED)` and `(MOVED|RENAMED, REMOVED)`: deletes the local
/// object.
///
/// A file whose content changed locally survives and is uploaded as a new
/// object. A folder holding anything not yet synchronized is kept; its
/// records are dropped and it is queued for upload.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteObjectDeletedSolver;

impl Solver for RemoteObjectDeletedSolver {
    fn name(&self) -> &'static str {
        "delete-local"
    }

    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        sink: &EventSink,
    ) -> SyncResult<()> {
        let record = record_of(found, event)?;
        let Some(local) = found.local_path.as_deref() else {
            return forget(ctx, record);
        };

        if record.is_folder() {
            if has_unsynced_content(ctx, local)? {
                info!(path = %local.display(), "Folder holds unsynchronized content, keeping it");
                forget(ctx, record)?;
                sink.add_event(FsEvent::new(FsEventKind::Created, local));
                return Ok(());
            }
        } else if local_content_changed(ctx, record, local)? {
            forget(ctx, record)?;
            upload_new(ctx, record.kind, local, sink)?;
            info!(path = %local.display(), "Local change outlived remote deletion");
            return Ok(());
        }

        remove_local(ctx, record.kind, local)?;
        forget(ctx, record)
    }
}

/// `(REMOVED, CHANGED)`: the remote change wins over the local deletion.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteChangedSurvivesSolver;

impl Solver for RemoteChangedSurvivesSolver {
    fn name(&self) -> &'static str {
        "remote-change-survives"
    }

    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        sink: &EventSink,
    ) -> SyncResult<()> {
        let record = record_of(found, event)?;
        let remote = remote_of(found, event)?;
        restore_locally(ctx, record, remote, sink)
    }
}

/// `(CHANGED, REMOVED)`: the local change wins over the remote deletion and
/// is uploaded as a new object.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalChangedSurvivesSolver;

impl Solver for LocalChangedSurvivesSolver {
    fn name(&self) -> &'static str {
        "local-change-survives"
    }

    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        sink: &EventSink,
    ) -> SyncResult<()> {
        let record = record_of(found, event)?;
        let local = current_local(found, event)?;
        forget(ctx, record)?;
        upload_new(ctx, record.kind, local, sink)?;
        info!(path = %local.display(), "Local change outlived remote deletion");
        Ok(())
    }
}

/// `(REMOVED, REMOVED)`: both sides deleted the object; only the record is
/// left to clean up.
#[derive(Debug, Default, Clone, Copy)]
pub struct BothRemovedSolver;

impl Solver for BothRemovedSolver {
    fn name(&self) -> &'static str {
        "both-removed"
    }

    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        _sink: &EventSink,
    ) -> SyncResult<()> {
        forget(ctx, record_of(found, event)?)
    }
}
