//! Session orchestration: cycle control, state, reporting and the
//! background workers of one synchronized repository.

use crate::accumulator::{LocalAccumulator, RemoteAccumulator};
use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::local::LocalFileSystem;
use crate::mechanism::SyncMechanism;
use crate::producer::{ChangeLogPoller, Crawler, PollOutcome, WatcherAdapter};
use crate::queue::{EventSink, QueueWorker, SyncEventHandler, SyncEventQueue, PRIORITY_CONTROL};
use crate::remote::RemoteRepository;
use crate::transform::{ContentChangeResolver, FsEventResolver};
use parking_lot::{Condvar, Mutex, RwLock};
use reposync_events::{CycleMarker, SyncEvent};
use reposync_store::MetadataStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What the session is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next cycle.
    Idle,
    /// Reading the remote change log.
    Polling,
    /// Walking both trees.
    Crawling,
    /// Paused by the user.
    Suspended,
    /// The last cycle surfaced failures.
    Error,
}

impl SessionState {
    /// Returns true while a producer is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Polling | SessionState::Crawling)
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Whether the cycle crawled both trees.
    pub full_crawl: bool,
    /// Object events that reached the mechanism.
    pub events_processed: u64,
    /// Solver runs by solver name; no-ops are not counted.
    pub solver_invocations: BTreeMap<String, u64>,
    /// Failures surfaced to the user.
    pub failures: Vec<String>,
    /// Skipped objects (permission denied and the like).
    pub warnings: Vec<String>,
    /// Conflicts left for the user.
    pub unresolved: Vec<String>,
    /// Whether the change-log token was advanced.
    pub token_advanced: bool,
    /// Wall time from cycle start to marker.
    pub duration: Duration,
}

impl CycleReport {
    /// Total solver runs.
    pub fn total_invocations(&self) -> u64 {
        self.solver_invocations.values().sum()
    }

    /// Runs of one solver.
    pub fn invocations_of(&self, solver: &str) -> u64 {
        self.solver_invocations.get(solver).copied().unwrap_or(0)
    }

    /// Returns true if nothing failed or was left unresolved.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.unresolved.is_empty()
    }
}

/// Counters across every cycle of a session.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed cycles.
    pub cycles_completed: u64,
    /// Completed cycles that crawled.
    pub full_crawls: u64,
    /// Object events that reached the mechanism.
    pub events_processed: u64,
    /// Solver runs.
    pub solver_invocations: u64,
    /// Surfaced failures.
    pub failures: u64,
    /// Conflicts left unresolved.
    pub unresolved_conflicts: u64,
    /// When the last cycle completed.
    pub last_sync_time: Option<Instant>,
    /// Last surfaced failure.
    pub last_error: Option<String>,
}

type CycleListener = Box<dyn Fn(&CycleReport) + Send + Sync>;

/// State shared between the controller handler and the session facade.
struct SessionShared {
    state: RwLock<SessionState>,
    stats: RwLock<SyncStats>,
    last_report: RwLock<Option<CycleReport>>,
    cycle_started: Mutex<Option<Instant>>,
    listeners: RwLock<Vec<CycleListener>>,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Idle),
            stats: RwLock::new(SyncStats::default()),
            last_report: RwLock::new(None),
            cycle_started: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
        }
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        // Suspension wins over anything a running cycle reports
        if *current == SessionState::Suspended && state != SessionState::Idle {
            return;
        }
        *current = state;
    }
}

/// Highest-priority handler: turns `StartNextSync` into producer output and
/// closes cycles at their `FullSyncCompleted` marker.
struct CycleController {
    ctx: Arc<SyncContext>,
    crawler: Arc<Crawler>,
    poller: ChangeLogPoller,
    shared: Arc<SessionShared>,
}

impl CycleController {
    fn start_cycle(&self, requested_full: bool, sink: &EventSink) -> SyncResult<bool> {
        let forced = self.ctx.take_full_crawl_request();
        let stored = self.ctx.store().change_log_token()?;
        let mut full = requested_full || forced || stored.is_none();
        *self.shared.cycle_started.lock() = Some(Instant::now());

        let produced = if full {
            self.crawl()
        } else {
            self.shared.set_state(SessionState::Polling);
            match self.poller.poll(&self.ctx, stored.as_deref()) {
                Ok(PollOutcome::Changes { events, token }) => Ok((events, token)),
                Ok(PollOutcome::FullCrawlRequired) => {
                    full = true;
                    self.crawl()
                }
                Err(e) => Err(e),
            }
        };

        match produced {
            Ok((events, token)) => {
                info!(full_crawl = full, events = events.len(), "Cycle started");
                for event in events {
                    sink.add_event(event);
                }
                sink.add_event(SyncEvent::FullSyncCompleted(CycleMarker {
                    full_crawl: full,
                    change_log_token: Some(token),
                }));
            }
            Err(e @ (SyncError::Cancelled | SyncError::Suspended)) => {
                info!(reason = %e, "Cycle abandoned");
                if full {
                    self.ctx.request_full_crawl();
                }
                *self.shared.cycle_started.lock() = None;
                if matches!(e, SyncError::Cancelled) {
                    self.shared.set_state(SessionState::Idle);
                }
            }
            Err(e) => {
                warn!(full_crawl = full, error = %e, "Change producer failed");
                self.ctx.record(|recorder| {
                    recorder.failures.push(e.to_string());
                    recorder.retryable_failure |= e.is_retryable();
                });
                if full {
                    self.ctx.request_full_crawl();
                }
                sink.add_event(SyncEvent::FullSyncCompleted(CycleMarker {
                    full_crawl: full,
                    change_log_token: None,
                }));
            }
        }
        Ok(true)
    }

    fn crawl(&self) -> SyncResult<(Vec<SyncEvent>, String)> {
        self.shared.set_state(SessionState::Crawling);
        let outcome = self.crawler.crawl(&self.ctx)?;
        Ok((outcome.events, outcome.token))
    }

    fn complete_cycle(&self, marker: &CycleMarker, sink: &EventSink) -> SyncResult<bool> {
        // Follow-up events queued by solvers belong to this cycle
        if sink.pending_work() > 0 {
            debug!("Deferring cycle marker behind follow-up events");
            sink.add_event(SyncEvent::FullSyncCompleted(marker.clone()));
            return Ok(true);
        }

        let recorder = self.ctx.take_recorder();
        let mut token_advanced = false;
        match &marker.change_log_token {
            Some(token) if !recorder.retryable_failure => {
                self.ctx.store().set_change_log_token(Some(token.as_str()))?;
                token_advanced = true;
            }
            Some(_) => info!("Keeping change-log token after a transient failure"),
            None => {}
        }

        let started = self.shared.cycle_started.lock().take();
        let report = CycleReport {
            full_crawl: marker.full_crawl,
            events_processed: recorder.events_processed,
            solver_invocations: recorder.solver_invocations,
            failures: recorder.failures,
            warnings: recorder.warnings,
            unresolved: recorder.unresolved,
            token_advanced,
            duration: started.map(|at| at.elapsed()).unwrap_or_default(),
        };

        {
            let mut stats = self.shared.stats.write();
            stats.cycles_completed += 1;
            stats.full_crawls += u64::from(report.full_crawl);
            stats.events_processed += report.events_processed;
            stats.solver_invocations += report.total_invocations();
            stats.failures += report.failures.len() as u64;
            stats.unresolved_conflicts += report.unresolved.len() as u64;
            stats.last_sync_time = Some(Instant::now());
            if let Some(last) = report.failures.last() {
                stats.last_error = Some(last.clone());
            }
        }
        self.shared.set_state(if report.failures.is_empty() {
            SessionState::Idle
        } else {
            SessionState::Error
        });

        info!(
            full_crawl = report.full_crawl,
            events = report.events_processed,
            solvers = report.total_invocations(),
            failures = report.failures.len(),
            unresolved = report.unresolved.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Cycle completed"
        );
        for listener in self.shared.listeners.read().iter() {
            listener(&report);
        }
        *self.shared.last_report.write() = Some(report);
        Ok(true)
    }
}

impl SyncEventHandler for CycleController {
    fn name(&self) -> &'static str {
        "cycle-controller"
    }

    fn priority(&self) -> i32 {
        PRIORITY_CONTROL
    }

    fn handle(&self, event: &mut SyncEvent, sink: &EventSink) -> SyncResult<bool> {
        match event {
            SyncEvent::StartNextSync { full_crawl } => self.start_cycle(*full_crawl, sink),
            SyncEvent::FullSyncCompleted(marker) => self.complete_cycle(marker, sink),
            _ => Ok(false),
        }
    }
}

/// One synchronized repository: the context, the queue with its handler
/// chain, and the producers.
///
/// ```rust,ignore
/// let session = SyncSession::new(config, remote, store, local);
/// let report = session.sync_once(false)?;
/// assert!(report.is_clean());
/// ```
pub struct SyncSession {
    ctx: Arc<SyncContext>,
    queue: SyncEventQueue,
    crawler: Arc<Crawler>,
    shared: Arc<SessionShared>,
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("ctx", &self.ctx)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl SyncSession {
    /// Creates a session and registers the handler chain.
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteRepository>,
        store: Arc<dyn MetadataStore>,
        local: Arc<dyn LocalFileSystem>,
    ) -> Self {
        let queue = SyncEventQueue::new(config.swallow_handler_errors);
        let ctx = Arc::new(SyncContext::new(config, remote, store, local));
        let crawler = Arc::new(Crawler::new());
        let shared = Arc::new(SessionShared::new());

        queue.register(Arc::new(CycleController {
            ctx: ctx.clone(),
            crawler: crawler.clone(),
            poller: ChangeLogPoller::new(),
            shared: shared.clone(),
        }));
        queue.register(Arc::new(FsEventResolver::new(ctx.clone())));
        queue.register(Arc::new(ContentChangeResolver::new(ctx.clone())));
        queue.register(Arc::new(LocalAccumulator::new(ctx.clone())));
        queue.register(Arc::new(RemoteAccumulator::new(ctx.clone())));
        queue.register(Arc::new(SyncMechanism::new(ctx.clone())));
        debug!(handlers = ?queue.handler_names(), "Session created");

        Self {
            ctx,
            queue,
            crawler,
            shared,
        }
    }

    /// Shared context of the session.
    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Adapter for feeding local filesystem notifications.
    pub fn watcher(&self) -> WatcherAdapter {
        WatcherAdapter::new(self.ctx.clone(), self.queue.sink())
    }

    /// Requests the next cycle.
    ///
    /// A full-crawl request cancels a crawl that is already running.
    pub fn start_next_sync(&self, full_crawl: bool) {
        if full_crawl {
            self.crawler.request_full_crawl();
        }
        self.queue
            .add_event(SyncEvent::StartNextSync { full_crawl });
    }

    /// Pauses the session: no further deliveries, producers stop at their
    /// next checkpoint. Queued events are kept.
    pub fn suspend(&self) {
        self.ctx.set_suspended(true);
        self.queue.suspend();
        *self.shared.state.write() = SessionState::Suspended;
        info!("Session suspended");
    }

    /// Resumes a suspended session.
    pub fn resume(&self) {
        self.ctx.set_suspended(false);
        *self.shared.state.write() = SessionState::Idle;
        self.queue.resume();
        info!("Session resumed");
    }

    /// Delivers queued events on the calling thread until the queue is
    /// empty or suspended. Returns the number of events delivered.
    ///
    /// # Errors
    ///
    /// Returns the first handler error when handler errors are not
    /// swallowed.
    pub fn run_until_idle(&self) -> SyncResult<usize> {
        self.queue.process_pending()
    }

    /// Runs one complete cycle on the calling thread and returns its report.
    ///
    /// # Errors
    ///
    /// Returns handler errors (when not swallowed), or
    /// [`SyncError::Suspended`]/[`SyncError::Cancelled`] if the cycle did
    /// not complete.
    pub fn sync_once(&self, full_crawl: bool) -> SyncResult<CycleReport> {
        let before = self.shared.stats.read().cycles_completed;
        self.start_next_sync(full_crawl);
        self.run_until_idle()?;
        if self.shared.stats.read().cycles_completed == before {
            return Err(if self.ctx.is_suspended() {
                SyncError::Suspended
            } else {
                SyncError::Cancelled
            });
        }
        self.last_report().ok_or(SyncError::Cancelled)
    }

    /// Starts the queue worker and, if a poll interval is configured, the
    /// poll timer. Both stop when the handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns the error from spawning a thread.
    pub fn spawn(&self) -> std::io::Result<SessionHandle> {
        let worker = self.queue.spawn()?;
        let timer = match self.ctx.config().poll_interval {
            Some(interval) => Some(PollTimer::spawn(
                interval,
                self.ctx.clone(),
                self.queue.clone(),
            )?),
            None => None,
        };
        info!(
            root = %self.ctx.paths().local_root().display(),
            polling = timer.is_some(),
            "Session started"
        );
        Ok(SessionHandle {
            timer,
            worker: Some(worker),
        })
    }

    /// Cumulative counters.
    pub fn stats(&self) -> SyncStats {
        self.shared.stats.read().clone()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Queued plus in-flight events.
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// Report of the last completed cycle.
    pub fn last_report(&self) -> Option<CycleReport> {
        self.shared.last_report.read().clone()
    }

    /// Registers a listener called after every completed cycle.
    ///
    /// Listeners run on the delivering thread and must not block.
    pub fn on_cycle_completed(&self, listener: impl Fn(&CycleReport) + Send + Sync + 'static) {
        self.shared.listeners.write().push(Box::new(listener));
    }
}

/// Background threads of a running session.
#[derive(Debug)]
pub struct SessionHandle {
    timer: Option<PollTimer>,
    worker: Option<QueueWorker>,
}

impl SessionHandle {
    /// Stops the timer and the queue worker and waits for both.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Enqueues an incremental cycle every interval while the session is
/// active and the queue is empty.
#[derive(Debug)]
struct PollTimer {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl PollTimer {
    fn spawn(
        interval: Duration,
        ctx: Arc<SyncContext>,
        queue: SyncEventQueue,
    ) -> std::io::Result<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = stop.clone();
        let handle = thread::Builder::new()
            .name("reposync-poll".into())
            .spawn(move || {
                let (stopped, wake) = &*signal;
                let mut stopped = stopped.lock();
                loop {
                    wake.wait_for(&mut stopped, interval);
                    if *stopped || queue.is_stopped() {
                        return;
                    }
                    if ctx.is_suspended() || queue.pending_count() > 0 {
                        continue;
                    }
                    queue.add_event(SyncEvent::StartNextSync { full_crawl: false });
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn stop(mut self) {
        let (stopped, wake) = &*self.stop;
        *stopped.lock() = true;
        wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Poll timer panicked");
            }
        }
    }
}
