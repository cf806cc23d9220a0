//! Building blocks shared by the solvers.
//!
//! Every helper that touches the local filesystem marks the path in the
//! self-write filter first, so the watcher does not feed the engine's own
//! writes back into the queue.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::queue::EventSink;
use reposync_events::{
    Fingerprint, FsEvent, FsEventKind, ObjectEvent, ObjectKind, RemoteId, RemoteObject,
};
use reposync_store::IdentityRecord;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

pub(crate) fn relative(ctx: &SyncContext, local: &Path) -> SyncResult<PathBuf> {
    ctx.paths().relative(local).ok_or_else(|| {
        SyncError::InvalidEvent(format!("{} is outside the sync root", local.display()))
    })
}

fn file_name(path: &Path) -> SyncResult<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| SyncError::InvalidEvent(format!("{} has no name", path.display())))
}

/// Returns the UUID of a local object, attaching a new one if missing.
pub(crate) fn ensure_uuid(ctx: &SyncContext, local: &Path) -> SyncResult<Option<Uuid>> {
    if let Some(uuid) = ctx.local().get_uuid(local)? {
        return Ok(Some(uuid));
    }
    let uuid = Uuid::new_v4();
    Ok(ctx.local().set_uuid(local, uuid)?.then_some(uuid))
}

/// Records the agreed state of `object` living at `local`.
///
/// A stale record holding the same path is dropped. If the local UUID
/// already belongs to another record (a copied file carrying its
/// original's attribute), the object gets a fresh one.
pub(crate) fn save_record(
    ctx: &SyncContext,
    object: &RemoteObject,
    local: &Path,
) -> SyncResult<IdentityRecord> {
    let store = ctx.store();
    let relative = relative(ctx, local)?;

    if let Some(stale) = store.get_by_local_path(&relative)? {
        if stale.remote_id != object.id {
            debug!(remote_id = %stale.remote_id, path = %relative.display(), "Dropping stale record");
            store.delete(&stale.remote_id)?;
        }
    }

    let mut uuid = ensure_uuid(ctx, local)?;
    if let Some(current) = uuid {
        if let Some(owner) = store.get_by_local_uuid(&current)? {
            if owner.remote_id != object.id {
                let fresh = Uuid::new_v4();
                uuid = ctx.local().set_uuid(local, fresh)?.then_some(fresh);
            }
        }
    }

    let mut record = IdentityRecord::new(object.kind, object.id.clone(), relative, object.name.clone())
        .with_change_token(object.change_token.clone())
        .with_remote_modified(object.last_modified);
    if let Some(parent) = &object.parent_id {
        record = record.with_parent(parent.clone());
    }
    if let Some(uuid) = uuid {
        record = record.with_uuid(uuid);
    }
    if object.kind.is_file() {
        record = record.with_fingerprint(ctx.local().fingerprint(local)?);
    }
    if let Some(metadata) = ctx.local().metadata(local)? {
        record = record.with_local_modified(metadata.modified);
    }

    store.save(record.clone())?;
    Ok(record)
}

/// Creates a folder locally (with any missing parents), marking each new
/// level as a self write.
pub(crate) fn create_local_dir(ctx: &SyncContext, local: &Path) -> SyncResult<()> {
    let mut missing = Vec::new();
    let mut current = Some(local);
    while let Some(path) = current {
        if ctx.local().metadata(path)?.is_some() || ctx.paths().relative(path).is_none() {
            break;
        }
        missing.push(path.to_path_buf());
        current = path.parent();
    }
    for path in missing.iter().rev() {
        ctx.self_writes().mark(path);
    }
    if !missing.is_empty() {
        ctx.local().create_dir(local)?;
    }
    Ok(())
}

/// Brings the remote object's content (or folder) to `local`.
pub(crate) fn download(ctx: &SyncContext, object: &RemoteObject, local: &Path) -> SyncResult<()> {
    if object.is_folder() {
        return create_local_dir(ctx, local);
    }
    if let Some(parent) = local.parent() {
        create_local_dir(ctx, parent)?;
    }
    let content = ctx.remote().get_content(&object.id)?;
    ctx.self_writes().mark(local);
    ctx.local().write(local, &content)?;
    info!(remote_id = %object.id, path = %local.display(), bytes = content.len(), "Downloaded");
    Ok(())
}

/// Returns the remote folder for a relative local folder, creating remote
/// folders (and their records) for levels that are not synchronized yet.
pub(crate) fn remote_parent_for(
    ctx: &SyncContext,
    parent: &Path,
    sink: &EventSink,
) -> SyncResult<RemoteId> {
    if parent.as_os_str().is_empty() {
        return ctx.remote_root_id();
    }
    if let Some(record) = ctx.store().get_by_local_path(parent)? {
        if record.is_folder() {
            return Ok(record.remote_id);
        }
    }

    let grandparent = parent.parent().unwrap_or(Path::new(""));
    let name = file_name(parent)?;
    let created = create_in(ctx, grandparent, sink, |id| {
        ctx.remote().create_folder(id, &name)
    });
    let folder = match created {
        Ok(folder) => folder,
        Err(SyncError::Conflict { .. }) => ctx
            .remote()
            .get_object_by_path(&ctx.paths().remote_path_for_local(parent))?,
        Err(e) => return Err(e),
    };
    info!(remote_id = %folder.id, path = %parent.display(), "Created remote folder");
    save_record(ctx, &folder, &ctx.paths().absolute(parent))?;
    Ok(folder.id)
}

/// Runs `create` against the remote folder mirroring `parent`.
///
/// A recorded folder deleted remotely in the meantime is recreated once;
/// see [`forget_vanished_folder`].
fn create_in<T>(
    ctx: &SyncContext,
    parent: &Path,
    sink: &EventSink,
    create: impl Fn(&RemoteId) -> SyncResult<T>,
) -> SyncResult<T> {
    let folder = remote_parent_for(ctx, parent, sink)?;
    match create(&folder) {
        Err(SyncError::NotFound { .. }) if forget_vanished_folder(ctx, parent, &folder, sink)? => {
            create(&remote_parent_for(ctx, parent, sink)?)
        }
        result => result,
    }
}

/// Drops the records of a folder the remote no longer has and queues its
/// local entries again, so everything below it is uploaded with the
/// recreated folder. Returns false if the folder still exists.
fn forget_vanished_folder(
    ctx: &SyncContext,
    parent: &Path,
    folder: &RemoteId,
    sink: &EventSink,
) -> SyncResult<bool> {
    if parent.as_os_str().is_empty() {
        return Ok(false);
    }
    match ctx.remote().get_object(folder) {
        Err(SyncError::NotFound { .. }) => {}
        Ok(_) => return Ok(false),
        Err(e) => return Err(e),
    }
    let Some(record) = ctx.store().get(folder)? else {
        return Ok(false);
    };
    info!(remote_id = %folder, path = %parent.display(), "Remote folder vanished, recreating it");
    forget(ctx, &record)?;
    queue_local_children(ctx, &ctx.paths().absolute(parent), sink)?;
    Ok(true)
}

/// Creates the remote counterpart of a new local object.
pub(crate) fn upload_new(
    ctx: &SyncContext,
    kind: ObjectKind,
    local: &Path,
    sink: &EventSink,
) -> SyncResult<IdentityRecord> {
    let relative = relative(ctx, local)?;
    let parent = relative.parent().unwrap_or(Path::new(""));
    let name = file_name(&relative)?;
    let object = match kind {
        ObjectKind::Folder => {
            create_in(ctx, parent, sink, |id| ctx.remote().create_folder(id, &name))?
        }
        ObjectKind::File => {
            let content = ctx.local().read(local)?;
            create_in(ctx, parent, sink, |id| {
                ctx.remote().create_document(id, &name, &content)
            })?
        }
    };
    info!(remote_id = %object.id, path = %relative.display(), kind = %kind, "Uploaded new object");
    save_record(ctx, &object, local)
}

/// Uploads changed local content, guarded by the recorded change token.
pub(crate) fn upload_content(
    ctx: &SyncContext,
    id: &RemoteId,
    expected_token: Option<&str>,
    local: &Path,
) -> SyncResult<RemoteObject> {
    let content = ctx.local().read(local)?;
    let object = ctx.remote().set_content(id, &content, expected_token)?;
    info!(remote_id = %id, path = %local.display(), bytes = content.len(), "Uploaded content");
    Ok(object)
}

/// Returns a free sibling path for a conflict copy: `stem (conflict).ext`,
/// then `stem (conflict 2).ext` and so on.
pub(crate) fn conflict_path(ctx: &SyncContext, local: &Path) -> SyncResult<PathBuf> {
    let stem = local
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = local
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let suffix = &ctx.config().conflict_suffix;

    for attempt in 1u32..=1000 {
        let marker = match (attempt, suffix.strip_suffix(')')) {
            (1, _) => suffix.clone(),
            (_, Some(open)) => format!("{open} {attempt})"),
            (_, None) => format!("{suffix} {attempt}"),
        };
        let candidate = local.with_file_name(format!("{stem}{marker}{extension}"));
        if ctx.local().metadata(&candidate)?.is_none() {
            return Ok(candidate);
        }
    }
    Err(SyncError::unresolved(
        local.display().to_string(),
        "no free conflict name",
    ))
}

/// Moves the local object aside as a conflict copy with its own identity
/// and queues the copy for upload. Returns the copy's path.
pub(crate) fn set_aside(ctx: &SyncContext, local: &Path, sink: &EventSink) -> SyncResult<PathBuf> {
    let copy = conflict_path(ctx, local)?;
    ctx.self_writes().mark(local);
    ctx.self_writes().mark(&copy);
    ctx.local().rename(local, &copy)?;
    ctx.local().set_uuid(&copy, Uuid::new_v4())?;
    info!(path = %local.display(), copy = %copy.display(), "Kept local version as conflict copy");
    sink.add_event(FsEvent::new(FsEventKind::Created, copy.clone()));
    Ok(copy)
}

/// Rewrites the records below a relocated folder.
pub(crate) fn relocate_descendants(ctx: &SyncContext, from: &Path, to: &Path) -> SyncResult<()> {
    if from == to {
        return Ok(());
    }
    let store = ctx.store();
    for mut record in store.descendants_of(from)? {
        let Ok(rest) = record.local_path.strip_prefix(from) else {
            continue;
        };
        let target = to.join(rest);
        if let Some(stale) = store.get_by_local_path(&target)? {
            if stale.remote_id != record.remote_id {
                store.delete(&stale.remote_id)?;
            }
        }
        record.local_path = target;
        store.save(record)?;
    }
    Ok(())
}

/// Drops the records below a folder.
pub(crate) fn remove_descendant_records(ctx: &SyncContext, folder: &Path) -> SyncResult<()> {
    for record in ctx.store().descendants_of(folder)? {
        ctx.store().delete(&record.remote_id)?;
    }
    Ok(())
}

/// Drops a record and everything recorded below it.
pub(crate) fn forget(ctx: &SyncContext, record: &IdentityRecord) -> SyncResult<()> {
    if record.is_folder() {
        remove_descendant_records(ctx, &record.local_path)?;
    }
    ctx.store().delete(&record.remote_id)?;
    Ok(())
}

/// Removes a local file or folder tree.
pub(crate) fn remove_local(ctx: &SyncContext, kind: ObjectKind, local: &Path) -> SyncResult<()> {
    ctx.self_writes().mark(local);
    let result = match kind {
        ObjectKind::Folder => ctx.local().remove_dir_all(local),
        ObjectKind::File => ctx.local().remove_file(local),
    };
    match result {
        Ok(()) => {
            info!(path = %local.display(), "Removed local object");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Queues an event for every remote child that has no record yet.
pub(crate) fn queue_remote_children(
    ctx: &SyncContext,
    folder: &RemoteId,
    sink: &EventSink,
) -> SyncResult<()> {
    for child in ctx.remote().get_children(folder)? {
        if ctx.store().get(&child.id)?.is_none() {
            sink.add_event(ObjectEvent::from_remote(
                child,
                reposync_events::ChangeType::Created,
            ));
        }
    }
    Ok(())
}

/// Queues a creation notification for every entry of a local folder.
pub(crate) fn queue_local_children(
    ctx: &SyncContext,
    folder: &Path,
    sink: &EventSink,
) -> SyncResult<()> {
    for child in ctx.local().list_dir(folder)? {
        sink.add_event(FsEvent::new(FsEventKind::Created, child));
    }
    Ok(())
}

/// Returns true if the local tree below `folder` holds anything the
/// identity store does not know in its current form.
pub(crate) fn has_unsynced_content(ctx: &SyncContext, folder: &Path) -> SyncResult<bool> {
    for child in ctx.local().list_dir(folder)? {
        let Some(relative) = ctx.paths().relative(&child) else {
            continue;
        };
        if ctx.is_ignored(&relative) {
            continue;
        }
        let Some(metadata) = ctx.local().metadata(&child)? else {
            continue;
        };
        let Some(record) = ctx.store().get_by_local_path(&relative)? else {
            return Ok(true);
        };
        let unsynced = match metadata.kind {
            ObjectKind::Folder => has_unsynced_content(ctx, &child)?,
            ObjectKind::File => {
                record.fingerprint.as_ref() != Some(&ctx.local().fingerprint(&child)?)
            }
        };
        if unsynced {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Returns true if the remote tree below `folder` holds an object without
/// a record or a file whose content moved on since the last sync.
pub(crate) fn remote_has_unsynced_content(
    ctx: &SyncContext,
    folder: &RemoteId,
) -> SyncResult<bool> {
    for child in ctx.remote().get_children(folder)? {
        let filtered = ctx
            .paths()
            .relative_for_remote(&child.path)
            .is_some_and(|relative| ctx.is_ignored(&relative));
        if filtered {
            continue;
        }
        let Some(record) = ctx.store().get(&child.id)? else {
            return Ok(true);
        };
        let unsynced = match child.kind {
            ObjectKind::Folder => remote_has_unsynced_content(ctx, &child.id)?,
            ObjectKind::File => remote_content_changed(&record, &child),
        };
        if unsynced {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Returns true if the remote content differs from what the record agreed
/// on. Without a remote fingerprint the change token decides.
pub(crate) fn remote_content_changed(record: &IdentityRecord, object: &RemoteObject) -> bool {
    match &object.fingerprint {
        Some(fingerprint) => record.fingerprint.as_ref() != Some(fingerprint),
        None => record.change_token.as_deref() != Some(object.change_token.as_str()),
    }
}

/// Returns true if the local file differs from what the record agreed on.
pub(crate) fn local_content_changed(
    ctx: &SyncContext,
    record: &IdentityRecord,
    local: &Path,
) -> SyncResult<bool> {
    let fingerprint: Fingerprint = ctx.local().fingerprint(local)?;
    Ok(record.fingerprint.as_ref() != Some(&fingerprint))
}

/// Settles file content after both sides agree on the location.
///
/// Unchanged on both sides: nothing. Changed on one side: copy it over.
/// Changed on both with different results: keep the remote version and
/// set the local one aside.
pub(crate) fn reconcile_content(
    ctx: &SyncContext,
    record: &IdentityRecord,
    object: RemoteObject,
    local: &Path,
    sink: &EventSink,
) -> SyncResult<IdentityRecord> {
    if object.is_folder() {
        return save_record(ctx, &object, local);
    }
    let local_changed = local_content_changed(ctx, record, local)?;
    let remote_changed = remote_content_changed(record, &object);

    let object = match (local_changed, remote_changed) {
        (false, false) => object,
        (false, true) => {
            download(ctx, &object, local)?;
            object
        }
        (true, false) => upload_content(ctx, &object.id, Some(&object.change_token), local)?,
        (true, true) => {
            let same = object.fingerprint.as_ref() == Some(&ctx.local().fingerprint(local)?);
            if !same {
                set_aside(ctx, local, sink)?;
                download(ctx, &object, local)?;
            }
            object
        }
    };
    save_record(ctx, &object, local)
}
