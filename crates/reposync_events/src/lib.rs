//! # RepoSync Events
//!
//! Types flowing through the RepoSync reconciliation pipeline.
//!
//! This crate provides:
//! - The remote object model (`RemoteId`, `RemoteObject`, `ObjectKind`)
//! - Content fingerprints
//! - Change-log pages and de-duplication
//! - The closed `SyncEvent` union handled by the event queue
//! - `Situation` classification and the `SituationPair` solver key
//!
//! This is a pure types crate with no I/O beyond fingerprinting readers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_log;
mod event;
mod fingerprint;
mod object;
mod situation;

pub use change_log::{dedup_latest, ChangeLogEntry, ChangeLogPage, RemoteChangeKind};
pub use event::{
    ChangeType, ContentChangeEvent, CycleMarker, FsEvent, FsEventKind, FsMovedEvent, MovedFrom,
    ObjectEvent, RemoteState, SyncEvent,
};
pub use fingerprint::Fingerprint;
pub use object::{ObjectKind, RemoteId, RemoteObject};
pub use situation::{Situation, SituationPair};
