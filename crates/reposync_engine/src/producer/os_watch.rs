//! OS filesystem notifications through `notify`.

use super::WatcherAdapter;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use reposync_events::FsEventKind;
use tracing::{error, info};

/// Starts watching the adapter's root recursively.
///
/// Keep the returned watcher alive for as long as notifications are
/// wanted; dropping it stops the OS subscription.
///
/// # Errors
///
/// Returns the `notify` error if the watcher cannot be created or the root
/// cannot be watched.
pub fn spawn_os_watcher(adapter: WatcherAdapter) -> notify::Result<RecommendedWatcher> {
    let root = adapter.root().to_path_buf();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => forward(&adapter, event),
            Err(e) => error!(error = %e, "Watcher error"),
        }
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(root = %root.display(), "Watching local tree");
    Ok(watcher)
}

fn forward(adapter: &WatcherAdapter, event: Event) {
    let paths = &event.paths;
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            adapter.notify_moved(&paths[0], &paths[1]);
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            notify_all(adapter, FsEventKind::Deleted, paths);
        }
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Create(_) => {
            notify_all(adapter, FsEventKind::Created, paths);
        }
        EventKind::Modify(_) => notify_all(adapter, FsEventKind::Changed, paths),
        EventKind::Remove(_) => notify_all(adapter, FsEventKind::Deleted, paths),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }
}

fn notify_all(adapter: &WatcherAdapter, kind: FsEventKind, paths: &[std::path::PathBuf]) {
    for path in paths {
        adapter.notify(kind, path);
    }
}
