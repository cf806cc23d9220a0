//! Both sides produced content for the same object.

use super::actions::{
    download, queue_local_children, queue_remote_children, save_record, set_aside,
};
use super::{current_local, remote_of, Solver};
use crate::context::SyncContext;
use crate::detector::Classification;
use crate::error::SyncResult;
use crate::queue::EventSink;
use reposync_events::{ObjectEvent, ObjectKind};
use std::path::Path;

/// Keeps the remote version at the original path and the local version
/// beside it as a conflict copy, unless both already hold the same bytes.
fn keep_both(
    ctx: &SyncContext,
    found: &Classification,
    event: &ObjectEvent,
    local: &Path,
    sink: &EventSink,
) -> SyncResult<()> {
    let remote = remote_of(found, event)?;
    if remote.fingerprint.as_ref() != Some(&ctx.local().fingerprint(local)?) {
        set_aside(ctx, local, sink)?;
        download(ctx, remote, local)?;
    }
    save_record(ctx, remote, local)?;
    Ok(())
}

/// `(CHANGED, CHANGED)`: remote wins, the local edit survives as
/// `name (conflict).ext`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictSolver;

impl Solver for ConflictSolver {
    fn name(&self) -> &'static str {
        "conflict-copy"
    }

    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        sink: &EventSink,
    ) -> SyncResult<()> {
        let local = current_local(found, event)?;
        if remote_of(found, event)?.is_folder() {
            save_record(ctx, remote_of(found, event)?, local)?;
            return Ok(());
        }
        keep_both(ctx, found, event, local, sink)
    }
}

/// `(ADDED, ADDED)`: objects created independently on both sides at the
/// same path.
///
/// Folders merge and their children are queued from both sides. Files with
/// equal content are simply recorded; otherwise (or when the kinds differ)
/// the local object is set aside as a conflict copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct BothAddedSolver;

impl Solver for BothAddedSolver {
    fn name(&self) -> &'static str {
        "both-added"
    }

    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        sink: &EventSink,
    ) -> SyncResult<()> {
        let remote = remote_of(found, event)?;
        let local = current_local(found, event)?;
        let local_kind = ctx.local().metadata(local)?.map(|metadata| metadata.kind);

        match (local_kind, remote.kind) {
            (Some(ObjectKind::Folder), ObjectKind::Folder) => {
                save_record(ctx, remote, local)?;
                queue_remote_children(ctx, &remote.id, sink)?;
                queue_local_children(ctx, local, sink)?;
                Ok(())
            }
            (Some(ObjectKind::File), ObjectKind::File) => keep_both(ctx, found, event, local, sink),
            _ => {
                set_aside(ctx, local, sink)?;
                download(ctx, remote, local)?;
                save_record(ctx, remote, local)?;
                if remote.is_folder() {
                    queue_remote_children(ctx, &remote.id, sink)?;
                }
                Ok(())
            }
        }
    }
}
