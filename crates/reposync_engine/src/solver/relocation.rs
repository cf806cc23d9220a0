//! Moves and renames.

use super::actions::{reconcile_content, relative, relocate_descendants, remote_parent_for};
use super::{current_local, record_of, remote_of, Solver};
use crate::context::SyncContext;
use crate::detector::Classification;
use crate::error::{SyncError, SyncResult};
use crate::queue::EventSink;
use reposync_events::{ObjectEvent, RemoteObject};
use reposync_store::IdentityRecord;
use std::path::{Path, PathBuf};
use tracing::info;

/// Any pair where at least one side moved or renamed the object.
///
/// The net effect is applied with at most one move and one rename on the
/// other side; content changes are settled afterwards at the new location.
/// Both sides relocating to different places is reported as unresolved
/// and nothing is touched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetMoveSolver;

impl NetMoveSolver {
    /// Applies the local location to the remote object.
    fn relocate_remote(
        ctx: &SyncContext,
        record: &IdentityRecord,
        remote: &RemoteObject,
        relative: &Path,
        sink: &EventSink,
    ) -> SyncResult<RemoteObject> {
        let parent = relative.parent().unwrap_or(Path::new(""));
        let name = relative
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target_parent = remote_parent_for(ctx, parent, sink)?;

        let mut object = remote.clone();
        if object.parent_id.as_ref() != Some(&target_parent) {
            let source = object.parent_id.clone().ok_or_else(|| {
                SyncError::InvalidEvent(format!("{} has no parent", record.remote_id))
            })?;
            object = ctx
                .remote()
                .move_object(&record.remote_id, &source, &target_parent)?;
            info!(remote_id = %record.remote_id, to = %parent.display(), "Moved remote object");
        }
        if object.name != name {
            object = ctx.remote().update_properties(
                &record.remote_id,
                &name,
                Some(&object.change_token),
            )?;
            info!(remote_id = %record.remote_id, name = %name, "Renamed remote object");
        }
        Ok(object)
    }

    /// Applies the remote location to the local object.
    fn relocate_local(ctx: &SyncContext, current: &Path, target: &Path) -> SyncResult<()> {
        if current == target {
            return Ok(());
        }
        ctx.self_writes().mark(current);
        ctx.self_writes().mark(target);
        ctx.local().rename(current, target)?;
        info!(from = %current.display(), to = %target.display(), "Relocated local object");
        Ok(())
    }
}

impl Solver for NetMoveSolver {
    fn name(&self) -> &'static str {
        "net-move"
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
        let current = current_local(found, event)?;
        let current_relative = relative(ctx, current)?;
        let remote_relative = ctx.paths().relative_for_remote(&remote.path).ok_or_else(|| {
            SyncError::InvalidEvent(format!("{} is outside the sync root", remote.path))
        })?;

        let local_moved = found.pair.local.is_relocation();
        let remote_moved = found.pair.remote.is_relocation();

        let (object, final_path): (RemoteObject, PathBuf) = match (local_moved, remote_moved) {
            (true, true) if current_relative != remote_relative => {
                return Err(SyncError::unresolved(
                    current.display().to_string(),
                    format!(
                        "moved locally to {} and remotely to {}",
                        current_relative.display(),
                        remote_relative.display()
                    ),
                ));
            }
            (true, false) => (
                Self::relocate_remote(ctx, record, remote, &current_relative, sink)?,
                current.to_path_buf(),
            ),
            (false, true) => {
                let target = ctx.paths().absolute(&remote_relative);
                Self::relocate_local(ctx, current, &target)?;
                (remote.clone(), target)
            }
            _ => (remote.clone(), current.to_path_buf()),
        };

        let final_relative = relative(ctx, &final_path)?;
        relocate_descendants(ctx, &record.local_path, &final_relative)?;
        reconcile_content(ctx, record, object, &final_path, sink)?;
        Ok(())
    }
}
