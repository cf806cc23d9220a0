//! Local watcher adapter.

use crate::context::SyncContext;
use crate::queue::EventSink;
use reposync_events::{FsEvent, FsEventKind, FsMovedEvent};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Turns filesystem notifications into raw events.
///
/// Notifications outside the sync root, for filtered names, or caused by the
/// engine's own writes are dropped. Events are queued even while the
/// session is suspended; the queue holds them until it resumes.
#[derive(Debug, Clone)]
pub struct WatcherAdapter {
    ctx: Arc<SyncContext>,
    sink: EventSink,
}

impl WatcherAdapter {
    /// Creates an adapter feeding `sink`.
    pub fn new(ctx: Arc<SyncContext>, sink: EventSink) -> Self {
        Self { ctx, sink }
    }

    /// Local root being watched.
    pub fn root(&self) -> &Path {
        self.ctx.paths().local_root()
    }

    fn accepts(&self, path: &Path) -> bool {
        let Some(relative) = self.ctx.paths().relative(path) else {
            return false;
        };
        !self.ctx.is_ignored(&relative)
    }

    fn is_echo(&self, path: &Path) -> bool {
        self.ctx.self_writes().should_suppress(path)
    }

    /// Handles a create, change or delete notification. Returns true if an
    /// event was queued.
    pub fn notify(&self, kind: FsEventKind, path: &Path) -> bool {
        if !self.accepts(path) || self.is_echo(path) {
            trace!(path = %path.display(), ?kind, "Dropping notification");
            return false;
        }
        self.sink.add_event(FsEvent::new(kind, path));
        true
    }

    /// Handles a rename notification. Returns true if an event was queued.
    ///
    /// A rename out of the watched tree (or onto a filtered name) is a
    /// deletion; a rename into it is a creation.
    pub fn notify_moved(&self, old_path: &Path, new_path: &Path) -> bool {
        if self.is_echo(old_path) && self.is_echo(new_path) {
            trace!(from = %old_path.display(), to = %new_path.display(), "Dropping own rename");
            return false;
        }
        match (self.accepts(old_path), self.accepts(new_path)) {
            (true, true) => {
                self.sink.add_event(FsMovedEvent::new(old_path, new_path));
                true
            }
            (true, false) => {
                self.sink
                    .add_event(FsEvent::new(FsEventKind::Deleted, old_path));
                true
            }
            (false, true) => {
                self.sink
                    .add_event(FsEvent::new(FsEventKind::Created, new_path));
                true
            }
            (false, false) => false,
        }
    }
}
