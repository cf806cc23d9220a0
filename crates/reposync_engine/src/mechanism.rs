//! The sync mechanism: classify, pick a solver, run it.

use crate::context::SyncContext;
use crate::detector::{Classification, SituationDetector};
use crate::error::{SyncError, SyncResult};
use crate::queue::{EventSink, SyncEventHandler, PRIORITY_MECHANISM};
use crate::solver::{SolverMatrix, NOTHING_TO_DO};
use reposync_events::{ObjectEvent, RemoteState, SyncEvent};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Terminal handler for object events.
///
/// A solver failing with a race error (object gone, precondition broken)
/// gets one re-classification; if the situation pair changed, the new
/// solver runs, otherwise the error is surfaced.
#[derive(Debug)]
pub struct SyncMechanism {
    ctx: Arc<SyncContext>,
    detector: SituationDetector,
    matrix: SolverMatrix,
}

impl SyncMechanism {
    /// Creates the mechanism with the standard matrix.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self::with_matrix(ctx, SolverMatrix::new())
    }

    /// Creates the mechanism with a custom matrix.
    pub fn with_matrix(ctx: Arc<SyncContext>, matrix: SolverMatrix) -> Self {
        Self {
            detector: SituationDetector::new(ctx.clone()),
            ctx,
            matrix,
        }
    }

    fn run(
        &self,
        event: &ObjectEvent,
        found: &Classification,
        sink: &EventSink,
    ) -> SyncResult<()> {
        let Some(solver) = self.matrix.get(found.pair) else {
            return Err(SyncError::unresolved(
                event.to_string(),
                format!("no solver for {}", found.pair),
            ));
        };
        if solver.name() != NOTHING_TO_DO {
            info!(solver = solver.name(), situation = %found.pair, event = %event, "Solving");
            self.ctx.record(|recorder| recorder.solver_ran(solver.name()));
        }
        solver.solve(&self.ctx, event, found, sink)
    }

    /// Fetches the remote side again after a race.
    fn refresh_remote(&self, event: &mut ObjectEvent) {
        let fetched = match event.effective_remote_id().cloned() {
            Some(id) => self.ctx.remote().get_object(&id),
            None => match event.local().and_then(|path| self.ctx.paths().relative(path)) {
                Some(relative) => self
                    .ctx
                    .remote()
                    .get_object_by_path(&self.ctx.paths().remote_path_for_local(&relative)),
                None => return,
            },
        };
        match fetched {
            Ok(object) if self.ctx.paths().is_in_scope(&object.path) => {
                event.remote_id = Some(object.id.clone());
                event.remote = RemoteState::Present(object);
            }
            Ok(_) | Err(SyncError::NotFound { .. }) => event.remote = RemoteState::Absent,
            Err(e) => debug!(error = %e, "Cannot refresh remote state"),
        }
    }

    fn process(&self, event: &mut ObjectEvent, sink: &EventSink) -> SyncResult<()> {
        let found = self.detector.classify(event)?;
        match self.run(event, &found, sink) {
            Err(e) if e.is_race() => {
                warn!(situation = %found.pair, error = %e, "Situation changed under solver, re-classifying");
                self.refresh_remote(event);
                let again = self.detector.classify(event)?;
                if again.pair == found.pair {
                    return Err(e);
                }
                self.run(event, &again, sink)
            }
            other => other,
        }
    }
}

impl SyncEventHandler for SyncMechanism {
    fn name(&self) -> &'static str {
        "sync-mechanism"
    }

    fn priority(&self) -> i32 {
        PRIORITY_MECHANISM
    }

    fn handle(&self, event: &mut SyncEvent, sink: &EventSink) -> SyncResult<bool> {
        let SyncEvent::Object(object) = event else {
            return Ok(false);
        };
        if object.remote.is_unknown() {
            debug!(event = %object, "Remote side unknown, deferring to the next full crawl");
            self.ctx.request_full_crawl();
            return Ok(true);
        }

        if let Some(id) = object.effective_remote_id() {
            if self.ctx.record(|recorder| recorder.held.contains(id)) {
                debug!(event = %object, "Object has an unresolved conflict, skipping");
                return Ok(true);
            }
        }

        self.ctx.record(|recorder| recorder.events_processed += 1);
        match self.process(object, sink) {
            Ok(()) => Ok(true),
            Err(e) if e.is_permission_denied() => {
                warn!(event = %object, error = %e, "Permission denied, skipping");
                self.ctx.record(|recorder| recorder.warnings.push(e.to_string()));
                Ok(true)
            }
            Err(e @ SyncError::UnresolvedConflict { .. }) => {
                warn!(event = %object, error = %e, "Leaving conflict unresolved");
                let id = object.effective_remote_id().cloned();
                self.ctx.record(|recorder| {
                    recorder.unresolved.push(e.to_string());
                    recorder.held.extend(id);
                });
                Ok(true)
            }
            Err(e) if e.is_retryable() => {
                warn!(event = %object, error = %e, "Transient failure, retrying with the next full crawl");
                self.ctx.record(|recorder| {
                    recorder.retryable_failure = true;
                    recorder.failures.push(e.to_string());
                });
                self.ctx.request_full_crawl();
                Ok(true)
            }
            Err(e) => {
                error!(event = %object, error = %e, "Solver failed");
                self.ctx.record(|recorder| recorder.failures.push(e.to_string()));
                self.ctx.request_full_crawl();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::local::DiskFileSystem;
    use crate::queue::SyncEventQueue;
    use crate::remote::MemoryRepository;
    use crate::solver::Solver;
    use reposync_events::{ChangeType, ObjectKind, Situation};
    use reposync_store::{InMemoryStore, MetadataStore};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        remote: Arc<MemoryRepository>,
        ctx: Arc<SyncContext>,
        sink: EventSink,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MemoryRepository::new());
        let ctx = Arc::new(SyncContext::new(
            SyncConfig::new(dir.path()),
            remote.clone(),
            Arc::new(InMemoryStore::new()),
            Arc::new(DiskFileSystem::with_sidecar()),
        ));
        let sink = SyncEventQueue::new(false).sink();
        Fixture {
            dir,
            remote,
            ctx,
            sink,
        }
    }

    struct Refusing(fn() -> SyncError);

    impl Solver for Refusing {
        fn name(&self) -> &'static str {
            "refusing"
        }

        fn solve(
            &self,
            _ctx: &SyncContext,
            _event: &ObjectEvent,
            _found: &Classification,
            _sink: &EventSink,
        ) -> SyncResult<()> {
            Err((self.0)())
        }
    }

    fn refusing(ctx: &Arc<SyncContext>, error: fn() -> SyncError) -> SyncMechanism {
        let mut matrix = SolverMatrix::new();
        matrix.set(Situation::None, Situation::Added, Arc::new(Refusing(error)));
        SyncMechanism::with_matrix(ctx.clone(), matrix)
    }

    fn remote_added(f: &Fixture, path: &str) -> SyncEvent {
        f.remote.put_file(path, b"r").unwrap();
        let object = f.remote.find(path).unwrap();
        ObjectEvent::from_remote(object, ChangeType::Created).into()
    }

    #[test]
    fn unknown_remote_side_is_deferred() {
        let f = fixture();
        let mechanism = SyncMechanism::new(f.ctx.clone());
        let mut event: SyncEvent =
            ObjectEvent::from_local(ObjectKind::File, f.dir.path().join("a.txt"), ChangeType::Created)
                .into();

        assert!(mechanism.handle(&mut event, &f.sink).unwrap());
        assert!(f.ctx.full_crawl_requested());
        assert_eq!(f.ctx.take_recorder().events_processed, 0);
    }

    #[test]
    fn non_object_events_pass_through() {
        let f = fixture();
        let mechanism = SyncMechanism::new(f.ctx.clone());
        let mut event = SyncEvent::StartNextSync { full_crawl: false };
        assert!(!mechanism.handle(&mut event, &f.sink).unwrap());
    }

    #[test]
    fn unresolved_objects_are_held_for_the_cycle() {
        let f = fixture();
        let mechanism = refusing(&f.ctx, || SyncError::unresolved("x.txt", "test"));
        let mut event = remote_added(&f, "/x.txt");

        assert!(mechanism.handle(&mut event.clone(), &f.sink).unwrap());
        assert!(mechanism.handle(&mut event, &f.sink).unwrap());

        let recorder = f.ctx.take_recorder();
        assert_eq!(recorder.events_processed, 1);
        assert_eq!(recorder.unresolved.len(), 1);
        assert_eq!(recorder.total_invocations(), 1);
        assert!(recorder.failures.is_empty());
    }

    #[test]
    fn permission_denied_is_a_warning() {
        let f = fixture();
        let locked = f.remote.mkdir("/locked").unwrap();
        f.remote.deny(&locked);
        fs::create_dir(f.dir.path().join("locked")).unwrap();
        fs::write(f.dir.path().join("locked/a.txt"), b"a").unwrap();

        let mechanism = SyncMechanism::new(f.ctx.clone());
        let mut object = ObjectEvent::from_local(
            ObjectKind::File,
            f.dir.path().join("locked/a.txt"),
            ChangeType::Created,
        );
        object.remote = RemoteState::Absent;
        let mut event: SyncEvent = object.into();
        assert!(mechanism.handle(&mut event, &f.sink).unwrap());

        let recorder = f.ctx.take_recorder();
        assert_eq!(recorder.warnings.len(), 1);
        assert!(recorder.failures.is_empty());
        assert!(f.remote.find("/locked/a.txt").is_none());
    }

    #[test]
    fn race_with_unchanged_situation_is_surfaced() {
        let f = fixture();
        let mechanism = refusing(&f.ctx, || SyncError::not_found("x"));
        let mut event = remote_added(&f, "/x.txt");

        let err = mechanism.handle(&mut event, &f.sink).unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
        assert!(f.ctx.full_crawl_requested());

        let recorder = f.ctx.take_recorder();
        assert_eq!(recorder.failures.len(), 1);
        // The pair did not change, so there is no second run
        assert_eq!(recorder.solver_invocations.get("refusing"), Some(&1));
    }

    #[test]
    fn race_with_new_situation_runs_the_next_solver() {
        let f = fixture();
        let mechanism = SyncMechanism::new(f.ctx.clone());
        f.remote.put_file("/x.txt", b"r").unwrap();
        let mut added: SyncEvent =
            ObjectEvent::from_remote(f.remote.find("/x.txt").unwrap(), ChangeType::Created)
                .with_local(f.dir.path().join("x.txt"), ChangeType::None)
                .into();
        assert!(mechanism.handle(&mut added, &f.sink).unwrap());
        assert!(f.dir.path().join("x.txt").exists());

        // Changed remotely, then deleted before the download starts
        f.remote.put_file("/x.txt", b"r2").unwrap();
        let changed = f.remote.find("/x.txt").unwrap();
        f.remote.remove("/x.txt").unwrap();
        let mut event: SyncEvent = ObjectEvent::from_remote(changed, ChangeType::Changed).into();
        assert!(mechanism.handle(&mut event, &f.sink).unwrap());

        let recorder = f.ctx.take_recorder();
        assert!(recorder.failures.is_empty());
        assert_eq!(recorder.solver_invocations.get("download-changed"), Some(&1));
        assert_eq!(recorder.solver_invocations.get("delete-local"), Some(&1));
        assert!(!f.dir.path().join("x.txt").exists());
        assert!(f
            .ctx
            .store()
            .get_by_local_path(Path::new("x.txt"))
            .unwrap()
            .is_none());
        assert!(!f.ctx.full_crawl_requested());
    }
}
