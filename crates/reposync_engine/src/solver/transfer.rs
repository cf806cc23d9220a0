//! One-sided additions and content changes.

use super::actions::{
    download, queue_local_children, queue_remote_children, save_record, upload_content,
    upload_new,
};
use super::{current_local, record_of, remote_of, target_local, Solver, NOTHING_TO_DO};
use crate::context::SyncContext;
use crate::detector::Classification;
use crate::error::SyncResult;
use crate::queue::EventSink;
use reposync_events::ObjectEvent;
use tracing::debug;

/// `(NONE, NONE)`: both sides agree with the record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NothingToDoSolver;

impl Solver for NothingToDoSolver {
    fn name(&self) -> &'static str {
        NOTHING_TO_DO
    }

    fn solve(
        &self,
        _ctx: &SyncContext,
        event: &ObjectEvent,
        _found: &Classification,
        _sink: &EventSink,
    ) -> SyncResult<()> {
        debug!(event = %event, "Nothing to do");
        Ok(())
    }
}

/// `(NONE, ADDED)`: downloads a new remote object.
///
/// For folders, children without a record are queued, since a folder
/// moved into the synchronized tree reports only itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteObjectAddedSolver;

impl Solver for RemoteObjectAddedSolver {
    fn name(&self) -> &'static str {
        "download-new"
    }

    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        sink: &EventSink,
    ) -> SyncResult<()> {
        let remote = remote_of(found, event)?;
        let local = target_local(found, event)?;
        download(ctx, remote, local)?;
        save_record(ctx, remote, local)?;
        if remote.is_folder() {
            queue_remote_children(ctx, &remote.id, sink)?;
        }
        Ok(())
    }
}

/// `(ADDED, NONE)`: uploads a new local object.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalObjectAddedSolver;

impl Solver for LocalObjectAddedSolver {
    fn name(&self) -> &'static str {
        "upload-new"
    }

    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        sink: &EventSink,
    ) -> SyncResult<()> {
        let local = current_local(found, event)?;
        let kind = match ctx.local().metadata(local)? {
            Some(metadata) => metadata.kind,
            None => event.kind,
        };
        let record = upload_new(ctx, kind, local, sink)?;
        if record.is_folder() {
            queue_local_children(ctx, local, sink)?;
        }
        Ok(())
    }
}

/// `(NONE, CHANGED)`: brings remote content and metadata over.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteObjectChangedSolver;

impl Solver for RemoteObjectChangedSolver {
    fn name(&self) -> &'static str {
        "download-changed"
    }

    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        _sink: &EventSink,
    ) -> SyncResult<()> {
        let record = record_of(found, event)?;
        let remote = remote_of(found, event)?;
        let local = current_local(found, event)?;

        let same_content = remote.is_folder()
            || (remote.fingerprint.is_some() && remote.fingerprint == record.fingerprint);
        if !same_content {
            download(ctx, remote, local)?;
        }
        save_record(ctx, remote, local)?;
        Ok(())
    }
}

/// `(CHANGED, NONE)`: uploads changed local content.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalObjectChangedSolver;

impl Solver for LocalObjectChangedSolver {
    fn name(&self) -> &'static str {
        "upload-changed"
    }

    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        _sink: &EventSink,
    ) -> SyncResult<()> {
        let record = record_of(found, event)?;
        let local = current_local(found, event)?;
        let object = if record.is_folder() {
            remote_of(found, event)?.clone()
        } else {
            upload_content(
                ctx,
                &record.remote_id,
                record.change_token.as_deref(),
                local,
            )?
        };
        save_record(ctx, &object, local)?;
        Ok(())
    }
}
