//! Solvers and the situation matrix.
//!
//! A solver performs one corrective action for a classified event and
//! records the new agreed state, or fails leaving the record untouched.
//! [`SolverMatrix`] maps every `(local, remote)` situation pair to its
//! solver.

mod actions;
mod conflict;
mod deletion;
mod relocation;
mod transfer;

pub use conflict::{BothAddedSolver, ConflictSolver};
pub use deletion::{
    BothRemovedSolver, LocalChangedSurvivesSolver, LocalObjectDeletedSolver,
    RemoteChangedSurvivesSolver, RemoteObjectDeletedSolver,
};
pub use relocation::NetMoveSolver;
pub use transfer::{
    LocalObjectAddedSolver, LocalObjectChangedSolver, NothingToDoSolver, RemoteObjectAddedSolver,
    RemoteObjectChangedSolver,
};

use crate::context::SyncContext;
use crate::detector::Classification;
use crate::error::{SyncError, SyncResult};
use crate::queue::EventSink;
use reposync_events::{ObjectEvent, RemoteObject, Situation, SituationPair};
use reposync_store::IdentityRecord;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Name of the no-op solver; its runs are not counted.
pub const NOTHING_TO_DO: &str = "nothing-to-do";

/// One corrective action.
pub trait Solver: Send + Sync {
    /// Name used in logs and cycle reports.
    fn name(&self) -> &'static str;

    /// Performs the action for a classified event.
    fn solve(
        &self,
        ctx: &SyncContext,
        event: &ObjectEvent,
        found: &Classification,
        sink: &EventSink,
    ) -> SyncResult<()>;
}

/// Dispatch table from situation pairs to solvers.
pub struct SolverMatrix {
    solvers: HashMap<SituationPair, Arc<dyn Solver>>,
}

impl std::fmt::Debug for SolverMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverMatrix")
            .field("entries", &self.solvers.len())
            .finish()
    }
}

impl Default for SolverMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverMatrix {
    /// Builds the standard matrix.
    pub fn new() -> Self {
        use Situation::*;

        let nothing: Arc<dyn Solver> = Arc::new(NothingToDoSolver);
        let net_move: Arc<dyn Solver> = Arc::new(NetMoveSolver);
        let local_deleted: Arc<dyn Solver> = Arc::new(LocalObjectDeletedSolver);
        let remote_deleted: Arc<dyn Solver> = Arc::new(RemoteObjectDeletedSolver);

        let mut matrix = Self {
            solvers: HashMap::new(),
        };
        matrix.set(None, None, nothing);
        matrix.set(None, Added, Arc::new(RemoteObjectAddedSolver));
        matrix.set(None, Changed, Arc::new(RemoteObjectChangedSolver));
        matrix.set(None, Removed, remote_deleted.clone());

        matrix.set(Added, None, Arc::new(LocalObjectAddedSolver));
        matrix.set(Added, Added, Arc::new(BothAddedSolver));

        matrix.set(Changed, None, Arc::new(LocalObjectChangedSolver));
        matrix.set(Changed, Changed, Arc::new(ConflictSolver));
        matrix.set(Changed, Removed, Arc::new(LocalChangedSurvivesSolver));

        matrix.set(Removed, None, local_deleted.clone());
        matrix.set(Removed, Changed, Arc::new(RemoteChangedSurvivesSolver));
        matrix.set(Removed, Removed, Arc::new(BothRemovedSolver));

        for relocation in [Moved, Renamed] {
            matrix.set(None, relocation, net_move.clone());
            matrix.set(Changed, relocation, net_move.clone());
            matrix.set(Removed, relocation, local_deleted.clone());
            matrix.set(relocation, Removed, remote_deleted.clone());
            for remote in [None, Changed, Moved, Renamed] {
                matrix.set(relocation, remote, net_move.clone());
            }
        }
        matrix
    }

    /// Replaces the solver of one pair.
    pub fn set(&mut self, local: Situation, remote: Situation, solver: Arc<dyn Solver>) {
        self.solvers
            .insert(SituationPair::new(local, remote), solver);
    }

    /// Returns the solver of a pair, if the pair is solvable.
    pub fn get(&self, pair: SituationPair) -> Option<&Arc<dyn Solver>> {
        self.solvers.get(&pair)
    }

    /// Number of solvable pairs.
    pub fn len(&self) -> usize {
        self.solvers.len()
    }

    /// Returns true if no pair is solvable.
    pub fn is_empty(&self) -> bool {
        self.solvers.is_empty()
    }
}

fn missing(what: &str, event: &ObjectEvent) -> SyncError {
    SyncError::InvalidEvent(format!("{what} missing for {event}"))
}

pub(crate) fn record_of<'a>(
    found: &'a Classification,
    event: &ObjectEvent,
) -> SyncResult<&'a IdentityRecord> {
    found.record.as_ref().ok_or_else(|| missing("identity record", event))
}

pub(crate) fn remote_of<'a>(
    found: &'a Classification,
    event: &ObjectEvent,
) -> SyncResult<&'a RemoteObject> {
    found.remote.as_ref().ok_or_else(|| missing("remote object", event))
}

pub(crate) fn current_local<'a>(
    found: &'a Classification,
    event: &ObjectEvent,
) -> SyncResult<&'a Path> {
    found
        .local_path
        .as_deref()
        .ok_or_else(|| missing("local object", event))
}

pub(crate) fn target_local<'a>(
    found: &'a Classification,
    event: &'a ObjectEvent,
) -> SyncResult<&'a Path> {
    found
        .target_path(event)
        .ok_or_else(|| missing("local path", event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_covers_reachable_pairs() {
        use Situation::*;
        let matrix = SolverMatrix::new();
        let name = |local, remote| {
            matrix
                .get(SituationPair::new(local, remote))
                .map(|solver| solver.name())
        };

        assert_eq!(name(None, None), Some(NOTHING_TO_DO));
        assert_eq!(name(None, Added), Some("download-new"));
        assert_eq!(name(Added, None), Some("upload-new"));
        assert_eq!(name(Changed, Changed), Some("conflict-copy"));
        assert_eq!(name(Moved, Renamed), Some("net-move"));
        assert_eq!(name(Renamed, Moved), Some("net-move"));
        assert_eq!(name(Removed, Renamed), Some("delete-remote"));
        assert_eq!(name(Moved, Removed), Some("delete-local"));

        // Pairs that cannot be classified have no solver
        assert_eq!(name(Added, Removed), Option::None);
        assert_eq!(name(Changed, Added), Option::None);
        assert_eq!(matrix.len(), 28);
    }
}
