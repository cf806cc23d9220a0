//! Sync events.
//!
//! A `SyncEvent` is a mutable envelope: producers emit raw forms
//! (`Fs`, `FsMoved`, `ContentChange`), resolvers turn them into `Object`
//! events and accumulators fill in whatever reference is still missing
//! before the sync mechanism classifies them.

use crate::change_log::RemoteChangeKind;
use crate::object::{ObjectKind, RemoteId, RemoteObject};
use std::fmt;
use std::path::{Path, PathBuf};

/// Change reported for one side of an object event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChangeType {
    /// Nothing reported.
    #[default]
    None,
    /// Object appeared.
    Created,
    /// Content or metadata changed.
    Changed,
    /// Object disappeared.
    Deleted,
    /// Object was moved or renamed.
    Moved,
}

/// Kind of a raw local filesystem notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    /// Path was created.
    Created,
    /// Path content or metadata changed.
    Changed,
    /// Path was removed.
    Deleted,
}

/// Raw local watcher notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    /// Kind of notification.
    pub kind: FsEventKind,
    /// Absolute path.
    pub path: PathBuf,
}

impl FsEvent {
    /// Creates a raw notification.
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Raw local watcher notification for a rename or move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsMovedEvent {
    /// Absolute path before the move.
    pub old_path: PathBuf,
    /// Absolute path after the move.
    pub new_path: PathBuf,
}

impl FsMovedEvent {
    /// Creates a move notification.
    pub fn new(old_path: impl Into<PathBuf>, new_path: impl Into<PathBuf>) -> Self {
        Self {
            old_path: old_path.into(),
            new_path: new_path.into(),
        }
    }
}

/// Remote change-log entry waiting to be resolved into an object event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChangeEvent {
    /// Object that changed.
    pub remote_id: RemoteId,
    /// Kind of change.
    pub kind: RemoteChangeKind,
}

/// What is known about the remote side of an object event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RemoteState {
    /// Not looked up yet, or the lookup failed.
    #[default]
    Unknown,
    /// The repository reported the object as not existing.
    Absent,
    /// Live object snapshot.
    Present(RemoteObject),
}

impl RemoteState {
    /// Returns the live object if present.
    pub fn object(&self) -> Option<&RemoteObject> {
        match self {
            RemoteState::Present(object) => Some(object),
            _ => None,
        }
    }

    /// Returns true if nothing is known about the remote side.
    pub fn is_unknown(&self) -> bool {
        matches!(self, RemoteState::Unknown)
    }
}

/// Previous location of a moved object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovedFrom {
    /// Absolute local path before the move.
    pub local_path: PathBuf,
}

/// A file or folder event ready for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEvent {
    /// File or folder.
    pub kind: ObjectKind,
    /// Absolute local path, if known.
    pub local_path: Option<PathBuf>,
    /// Remote side.
    pub remote: RemoteState,
    /// Remote identifier, if known even when the object itself is not.
    pub remote_id: Option<RemoteId>,
    /// Change reported on the local side.
    pub local_change: ChangeType,
    /// Change reported on the remote side.
    pub remote_change: ChangeType,
    /// Previous local location for moved variants.
    pub moved_from: Option<MovedFrom>,
}

impl ObjectEvent {
    /// Creates an event for a file.
    pub fn file() -> Self {
        Self::new(ObjectKind::File)
    }

    /// Creates an event for a folder.
    pub fn folder() -> Self {
        Self::new(ObjectKind::Folder)
    }

    /// Creates an empty event of the given kind.
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            local_path: None,
            remote: RemoteState::Unknown,
            remote_id: None,
            local_change: ChangeType::None,
            remote_change: ChangeType::None,
            moved_from: None,
        }
    }

    /// Creates an event from a remote object snapshot.
    pub fn from_remote(object: RemoteObject, change: ChangeType) -> Self {
        let mut event = Self::new(object.kind);
        event.remote_id = Some(object.id.clone());
        event.remote = RemoteState::Present(object);
        event.remote_change = change;
        event
    }

    /// Creates an event for a local path.
    pub fn from_local(kind: ObjectKind, path: impl Into<PathBuf>, change: ChangeType) -> Self {
        Self::new(kind).with_local(path, change)
    }

    /// Sets the local path and change.
    pub fn with_local(mut self, path: impl Into<PathBuf>, change: ChangeType) -> Self {
        self.local_path = Some(path.into());
        self.local_change = change;
        self
    }

    /// Marks the remote side as known-absent.
    pub fn with_remote_absent(mut self, remote_id: RemoteId) -> Self {
        self.remote_id = Some(remote_id);
        self.remote = RemoteState::Absent;
        self.remote_change = ChangeType::Deleted;
        self
    }

    /// Records the previous local location.
    pub fn with_moved_from(mut self, old_path: impl Into<PathBuf>) -> Self {
        self.moved_from = Some(MovedFrom {
            local_path: old_path.into(),
        });
        self
    }

    /// Returns the live remote object, if present.
    pub fn remote_object(&self) -> Option<&RemoteObject> {
        self.remote.object()
    }

    /// Returns the remote identifier from the snapshot or the stored id.
    pub fn effective_remote_id(&self) -> Option<&RemoteId> {
        self.remote_object()
            .map(|object| &object.id)
            .or(self.remote_id.as_ref())
    }

    /// Returns the local path, if known.
    pub fn local(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// Returns true for file events.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }
}

impl fmt::Display for ObjectEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} event", self.kind)?;
        if let Some(path) = &self.local_path {
            write!(f, " local={} ({:?})", path.display(), self.local_change)?;
        }
        if let Some(id) = self.effective_remote_id() {
            write!(f, " remote={id} ({:?})", self.remote_change)?;
        }
        Ok(())
    }
}

/// Marker closing a synchronization cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleMarker {
    /// Whether the cycle was a full crawl.
    pub full_crawl: bool,
    /// Change-log token to persist once every event before the marker is handled.
    pub change_log_token: Option<String>,
}

/// The closed set of events handled by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Raw local create/change/delete notification.
    Fs(FsEvent),
    /// Raw local rename/move notification.
    FsMoved(FsMovedEvent),
    /// Remote change-log entry.
    ContentChange(ContentChangeEvent),
    /// File or folder event ready for the sync mechanism.
    Object(ObjectEvent),
    /// Starts the next synchronization cycle.
    StartNextSync {
        /// Crawl both trees instead of polling the change log.
        full_crawl: bool,
    },
    /// Closes a synchronization cycle.
    FullSyncCompleted(CycleMarker),
}

impl SyncEvent {
    /// Short name of the event kind, for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SyncEvent::Fs(_) => "fs",
            SyncEvent::FsMoved(_) => "fs-moved",
            SyncEvent::ContentChange(_) => "content-change",
            SyncEvent::Object(event) if event.is_file() => "file",
            SyncEvent::Object(_) => "folder",
            SyncEvent::StartNextSync { .. } => "start-next-sync",
            SyncEvent::FullSyncCompleted(_) => "full-sync-completed",
        }
    }

    /// Returns true for cycle control markers.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            SyncEvent::StartNextSync { .. } | SyncEvent::FullSyncCompleted(_)
        )
    }
}

impl From<ObjectEvent> for SyncEvent {
    fn from(event: ObjectEvent) -> Self {
        SyncEvent::Object(event)
    }
}

impl From<FsEvent> for SyncEvent {
    fn from(event: FsEvent) -> Self {
        SyncEvent::Fs(event)
    }
}

impl From<FsMovedEvent> for SyncEvent {
    fn from(event: FsMovedEvent) -> Self {
        SyncEvent::FsMoved(event)
    }
}
