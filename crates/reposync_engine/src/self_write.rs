//! Suppression of watcher notifications caused by the engine itself.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Remembers paths the solvers are about to touch.
///
/// A watcher notification for a marked path arriving within the window is
/// the echo of the engine's own write and must not become a new event.
#[derive(Debug)]
pub struct SelfWriteFilter {
    window: Duration,
    marks: Mutex<HashMap<PathBuf, Instant>>,
}

impl SelfWriteFilter {
    /// Creates a filter with the given suppression window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            marks: Mutex::new(HashMap::new()),
        }
    }

    /// Marks an absolute path as about to be written by the engine.
    ///
    /// Expired marks are dropped here as well as in
    /// [`SelfWriteFilter::should_suppress`].
    pub fn mark(&self, path: &Path) {
        let now = Instant::now();
        let mut marks = self.marks.lock();
        self.prune(&mut marks, now);
        marks.insert(path.to_path_buf(), now);
    }

    /// Returns true if a notification for `path` should be dropped.
    ///
    /// Paths below a marked folder are suppressed too, since removing or
    /// renaming a folder reports every descendant.
    pub fn should_suppress(&self, path: &Path) -> bool {
        let mut marks = self.marks.lock();
        self.prune(&mut marks, Instant::now());
        marks
            .keys()
            .any(|marked| path == marked || path.starts_with(marked))
    }

    fn prune(&self, marks: &mut HashMap<PathBuf, Instant>, now: Instant) {
        marks.retain(|_, marked| now.duration_since(*marked) <= self.window);
    }

    /// Number of live marks.
    pub fn len(&self) -> usize {
        self.marks.lock().len()
    }

    /// Returns true if nothing is marked.
    pub fn is_empty(&self) -> bool {
        self.marks.lock().is_empty()
    }
}
