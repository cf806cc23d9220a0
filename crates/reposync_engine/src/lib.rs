//! # RepoSync Engine
//!
//! Bidirectional reconciliation of a local directory tree with a remote
//! repository.
//!
//! This crate provides:
//! - A priority-dispatched event queue with suspend/resume
//! - Change producers: local watcher adapter, remote change-log poller,
//!   full-tree crawler
//! - Accumulators completing each event with both sides' state
//! - The situation detector and the solver matrix
//! - Remote-repository and local-filesystem contracts with reference
//!   implementations
//! - Session orchestration with cycle reports
//!
//! ## Architecture
//!
//! Every change, wherever it comes from, becomes a [`SyncEvent`] on one
//! serial queue. Handlers run in priority order:
//!
//! 1. Cycle control (`StartNextSync`, cycle markers)
//! 2. Transformation of raw notifications into object events
//! 3. Local, then remote accumulation
//! 4. The sync mechanism: classify into a [`SituationPair`], run the solver
//!
//! ## Key Invariants
//!
//! - One solver per event, at most one retry after a re-classification
//! - The change-log token advances only when a cycle completes without
//!   transient failures
//! - Identity records are updated only after the corrective action succeeded
//! - A suspended session performs no remote or local I/O
//!
//! ## Example
//!
//! ```rust,no_run
//! use reposync_engine::{DiskFileSystem, MemoryRepository, SyncConfig, SyncSession};
//! use reposync_store::InMemoryStore;
//! use std::sync::Arc;
//!
//! let session = SyncSession::new(
//!     SyncConfig::new("/tmp/sync"),
//!     Arc::new(MemoryRepository::new()),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(DiskFileSystem::with_sidecar()),
//! );
//! let report = session.sync_once(false).unwrap();
//! println!("{} solver runs", report.total_invocations());
//! ```
//!
//! [`SyncEvent`]: reposync_events::SyncEvent
//! [`SituationPair`]: reposync_events::SituationPair

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod accumulator;
mod config;
mod context;
mod detector;
mod error;
mod ignore;
mod local;
mod mechanism;
mod path_map;
mod producer;
mod queue;
mod remote;
mod retry;
mod self_write;
mod session;
mod solver;
mod transform;

/// Crate version, as reported by the maintenance CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use accumulator::{LocalAccumulator, RemoteAccumulator};
pub use config::{RetryConfig, SyncConfig};
pub use context::{CycleRecorder, SyncContext};
pub use detector::{Classification, SituationDetector};
pub use error::{SyncError, SyncResult};
pub use ignore::{IgnoreRules, TEMP_SUFFIX};
#[cfg(unix)]
pub use local::XattrUuidTags;
pub use local::{
    DiskFileSystem, LocalFileSystem, LocalMetadata, SidecarUuidTags, UuidTags, UUID_XATTR,
};
pub use mechanism::SyncMechanism;
pub use path_map::PathMapper;
#[cfg(feature = "watch")]
pub use producer::spawn_os_watcher;
pub use producer::{ChangeLogPoller, CrawlOutcome, Crawler, PollOutcome, WatcherAdapter};
pub use queue::{
    EventSink, QueueWorker, SyncEventHandler, SyncEventQueue, PRIORITY_ACCUMULATOR,
    PRIORITY_CONTROL, PRIORITY_MECHANISM, PRIORITY_TRANSFORM,
};
pub use remote::{MemoryRepository, RemoteRepository};
pub use retry::with_retry;
pub use self_write::SelfWriteFilter;
pub use session::{CycleReport, SessionHandle, SessionState, SyncSession, SyncStats};
pub use solver::{
    BothAddedSolver, BothRemovedSolver, ConflictSolver, LocalChangedSurvivesSolver,
    LocalObjectAddedSolver, LocalObjectChangedSolver, LocalObjectDeletedSolver, NetMoveSolver,
    NothingToDoSolver, RemoteChangedSurvivesSolver, RemoteObjectAddedSolver,
    RemoteObjectChangedSolver, RemoteObjectDeletedSolver, Solver, SolverMatrix, NOTHING_TO_DO,
};
