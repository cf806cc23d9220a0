//! Priority-dispatched event queue.
//!
//! Producers call [`SyncEventQueue::add_event`] from any thread. Events are
//! delivered one at a time, in arrival order, to a chain of handlers sorted
//! by descending priority (ties keep registration order). A handler returns
//! `Ok(true)` to stop propagation.
//!
//! Handlers may enqueue follow-up events through the [`EventSink`] they are
//! given; the queue lock is never held while a handler runs.

use crate::error::SyncResult;
use parking_lot::{Condvar, Mutex, RwLock};
use reposync_events::SyncEvent;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Priority of cycle control handlers.
pub const PRIORITY_CONTROL: i32 = 10_000;
/// Priority of handlers turning raw events into object events.
pub const PRIORITY_TRANSFORM: i32 = 3_000;
/// Priority of accumulators.
pub const PRIORITY_ACCUMULATOR: i32 = 2_000;
/// Priority of the sync mechanism.
pub const PRIORITY_MECHANISM: i32 = 1_000;

/// One link of the handler chain.
pub trait SyncEventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Higher priorities run first.
    fn priority(&self) -> i32;

    /// Handles (or enriches) an event.
    ///
    /// Returns `Ok(true)` if the event was fully handled and must not reach
    /// lower-priority handlers.
    fn handle(&self, event: &mut SyncEvent, sink: &EventSink) -> SyncResult<bool>;
}

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<SyncEvent>,
    suspended: bool,
    stopped: bool,
    in_flight: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
    handlers: RwLock<Vec<Arc<dyn SyncEventHandler>>>,
    dispatch: Mutex<()>,
    swallow_errors: bool,
}

/// Handle for enqueuing events, given to handlers and producers.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<Inner>,
}

impl EventSink {
    /// Enqueues an event for later delivery.
    pub fn add_event(&self, event: impl Into<SyncEvent>) {
        let event = event.into();
        let mut state = self.inner.state.lock();
        if state.stopped {
            debug!(kind = event.kind_name(), "Queue stopped, dropping event");
            return;
        }
        state.events.push_back(event);
        self.inner.available.notify_one();
    }

    /// Number of queued events other than cycle markers.
    pub fn pending_work(&self) -> usize {
        self.inner
            .state
            .lock()
            .events
            .iter()
            .filter(|event| !event.is_control())
            .count()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// The event queue of one synchronized repository.
#[derive(Clone)]
pub struct SyncEventQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncEventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEventQueue")
            .field("pending", &self.pending_count())
            .field("handlers", &self.inner.handlers.read().len())
            .finish()
    }
}

impl SyncEventQueue {
    /// Creates an empty queue.
    ///
    /// With `swallow_errors`, handler errors are logged and the drain
    /// continues; otherwise the first error stops the drain and is returned.
    pub fn new(swallow_errors: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                available: Condvar::new(),
                idle: Condvar::new(),
                handlers: RwLock::new(Vec::new()),
                dispatch: Mutex::new(()),
                swallow_errors,
            }),
        }
    }

    /// Registers a handler. Call before events flow.
    pub fn register(&self, handler: Arc<dyn SyncEventHandler>) {
        let mut handlers = self.inner.handlers.write();
        handlers.push(handler);
        // Stable sort keeps registration order among equal priorities
        handlers.sort_by_key(|handler| std::cmp::Reverse(handler.priority()));
    }

    /// Names of the registered handlers in dispatch order.
    pub fn handler_names(&self) -> Vec<&'static str> {
        self.inner
            .handlers
            .read()
            .iter()
            .map(|handler| handler.name())
            .collect()
    }

    /// Returns a sink for enqueuing events.
    pub fn sink(&self) -> EventSink {
        EventSink {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Enqueues an event for later delivery.
    pub fn add_event(&self, event: impl Into<SyncEvent>) {
        self.sink().add_event(event);
    }

    /// Pauses delivery. Queued events are kept.
    pub fn suspend(&self) {
        self.inner.state.lock().suspended = true;
        self.inner.idle.notify_all();
    }

    /// Resumes delivery.
    pub fn resume(&self) {
        self.inner.state.lock().suspended = false;
        self.inner.available.notify_all();
    }

    /// Returns true while delivery is paused.
    pub fn is_suspended(&self) -> bool {
        self.inner.state.lock().suspended
    }

    /// Number of queued events plus the one being handled.
    pub fn pending_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.events.len() + usize::from(state.in_flight)
    }

    /// Delivers queued events on the calling thread until the queue is
    /// empty or suspended. Returns the number of events delivered.
    ///
    /// # Errors
    ///
    /// Returns the first handler error unless errors are swallowed.
    pub fn process_pending(&self) -> SyncResult<usize> {
        let _serial = self.inner.dispatch.lock();
        let mut delivered = 0;
        loop {
            let event = {
                let mut state = self.inner.state.lock();
                if state.suspended || state.stopped {
                    None
                } else {
                    let event = state.events.pop_front();
                    state.in_flight = event.is_some();
                    event
                }
            };
            let Some(event) = event else {
                self.inner.idle.notify_all();
                return Ok(delivered);
            };

            let result = self.dispatch(event);
            self.inner.state.lock().in_flight = false;
            delivered += 1;

            if let Err(e) = result {
                if self.inner.swallow_errors {
                    warn!(error = %e, "Handler failed, continuing");
                } else {
                    self.inner.idle.notify_all();
                    return Err(e);
                }
            }
        }
    }

    fn dispatch(&self, mut event: SyncEvent) -> SyncResult<()> {
        let handlers: Vec<Arc<dyn SyncEventHandler>> = self.inner.handlers.read().clone();
        let sink = self.sink();
        debug!(kind = event.kind_name(), "Delivering event");
        for handler in handlers {
            if handler.handle(&mut event, &sink)? {
                return Ok(());
            }
        }
        debug!(kind = event.kind_name(), "No handler consumed event");
        Ok(())
    }

    /// Blocks until the queue is empty and nothing is in flight, or the
    /// timeout expires. Returns true if the queue went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.in_flight || (!state.events.is_empty() && !state.suspended) {
            if self.inner.idle.wait_until(&mut state, deadline).timed_out() {
                return !state.in_flight && (state.events.is_empty() || state.suspended);
            }
        }
        true
    }

    /// Stops delivery for good; later events are dropped.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        state.stopped = true;
        self.inner.available.notify_all();
        self.inner.idle.notify_all();
    }

    /// Returns true once [`SyncEventQueue::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    /// Starts a worker thread that delivers events as they arrive.
    pub fn spawn(&self) -> std::io::Result<QueueWorker> {
        let queue = self.clone();
        let handle = thread::Builder::new()
            .name("reposync-queue".into())
            .spawn(move || queue.run_worker())?;
        Ok(QueueWorker {
            queue: self.clone(),
            handle: Some(handle),
        })
    }

    fn run_worker(&self) {
        loop {
            {
                let mut state = self.inner.state.lock();
                while !state.stopped && (state.suspended || state.events.is_empty()) {
                    self.inner.available.wait(&mut state);
                }
                if state.stopped {
                    return;
                }
            }
            if let Err(e) = self.process_pending() {
                error!(error = %e, "Event delivery failed");
            }
        }
    }
}

/// A running queue worker. Dropping it stops the queue and joins the thread.
#[derive(Debug)]
pub struct QueueWorker {
    queue: SyncEventQueue,
    handle: Option<JoinHandle<()>>,
}

impl QueueWorker {
    /// Stops the queue and waits for the worker to exit.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.queue.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Queue worker panicked");
            }
        }
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use reposync_events::{FsEvent, FsEventKind};

    struct Recorder {
        name: &'static str,
        priority: i32,
        consume: bool,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl SyncEventHandler for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn handle(&self, event: &mut SyncEvent, _sink: &EventSink) -> SyncResult<bool> {
            self.seen
                .lock()
                .push(format!("{}:{}", self.name, event.kind_name()));
            Ok(self.consume)
        }
    }

    fn recorder(
        name: &'static str,
        priority: i32,
        consume: bool,
        seen: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn SyncEventHandler> {
        Arc::new(Recorder {
            name,
            priority,
            consume,
            seen: Arc::clone(seen),
        })
    }

    fn fs_event() -> SyncEvent {
        FsEvent::new(FsEventKind::Created, "/sync/a.txt").into()
    }

    #[test]
    fn dispatch_order_and_ties() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = SyncEventQueue::new(false);
        queue.register(recorder("low", 1, false, &seen));
        queue.register(recorder("first-tie", 5, false, &seen));
        queue.register(recorder("second-tie", 5, false, &seen));
        queue.register(recorder("high", 9, false, &seen));

        assert_eq!(
            queue.handler_names(),
            vec!["high", "first-tie", "second-tie", "low"]
        );

        queue.add_event(fs_event());
        assert_eq!(queue.process_pending().unwrap(), 1);
        assert_eq!(
            *seen.lock(),
            vec!["high:fs", "first-tie:fs", "second-tie:fs", "low:fs"]
        );
    }

    #[test]
    fn handled_events_stop_propagation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = SyncEventQueue::new(false);
        queue.register(recorder("stopper", 2, true, &seen));
        queue.register(recorder("never", 1, false, &seen));

        queue.add_event(fs_event());
        queue.process_pending().unwrap();
        assert_eq!(*seen.lock(), vec!["stopper:fs"]);
    }

    struct Echo;

    impl SyncEventHandler for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn priority(&self) -> i32 {
            0
        }

        fn handle(&self, event: &mut SyncEvent, sink: &EventSink) -> SyncResult<bool> {
            if let SyncEvent::StartNextSync { full_crawl: true } = event {
                sink.add_event(SyncEvent::StartNextSync { full_crawl: false });
            }
            Ok(true)
        }
    }

    #[test]
    fn handlers_can_enqueue_reentrantly() {
        let queue = SyncEventQueue::new(false);
        queue.register(Arc::new(Echo));
        queue.add_event(SyncEvent::StartNextSync { full_crawl: true });

        assert_eq!(queue.process_pending().unwrap(), 2);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn suspend_keeps_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = SyncEventQueue::new(false);
        queue.register(recorder("r", 1, true, &seen));

        queue.suspend();
        queue.add_event(fs_event());
        queue.add_event(fs_event());
        assert_eq!(queue.process_pending().unwrap(), 0);
        assert_eq!(queue.pending_count(), 2);

        queue.resume();
        assert_eq!(queue.process_pending().unwrap(), 2);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn pending_work_ignores_markers() {
        let queue = SyncEventQueue::new(false);
        queue.add_event(SyncEvent::StartNextSync { full_crawl: false });
        queue.add_event(fs_event());
        assert_eq!(queue.pending_count(), 2);
        assert_eq!(queue.sink().pending_work(), 1);
    }

    struct Failing;

    impl SyncEventHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn priority(&self) -> i32 {
            0
        }

        fn handle(&self, _event: &mut SyncEvent, _sink: &EventSink) -> SyncResult<bool> {
            Err(SyncError::InvalidEvent("boom".into()))
        }
    }

    #[test]
    fn fail_fast_versus_swallow() {
        let strict = SyncEventQueue::new(false);
        strict.register(Arc::new(Failing));
        strict.add_event(fs_event());
        strict.add_event(fs_event());
        assert!(strict.process_pending().is_err());
        assert_eq!(strict.pending_count(), 1);

        let lenient = SyncEventQueue::new(true);
        lenient.register(Arc::new(Failing));
        lenient.add_event(fs_event());
        lenient.add_event(fs_event());
        assert_eq!(lenient.process_pending().unwrap(), 2);
    }

    #[test]
    fn worker_delivers_and_stops() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = SyncEventQueue::new(true);
        queue.register(recorder("r", 1, true, &seen));
        let worker = queue.spawn().unwrap();

        for _ in 0..5 {
            queue.add_event(fs_event());
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < 5 && Instant::now() < deadline {
            queue.wait_idle(Duration::from_millis(50));
        }
        assert_eq!(seen.lock().len(), 5);

        worker.shutdown();
        assert!(queue.is_stopped());
        queue.add_event(fs_event());
        assert_eq!(queue.pending_count(), 0);
    }
}
