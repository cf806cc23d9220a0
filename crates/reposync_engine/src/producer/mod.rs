//! Change producers: the watcher adapter, the remote change-log poller and
//! the full-tree crawler.

mod change_log;
mod crawler;
#[cfg(feature = "watch")]
mod os_watch;
mod watcher;

pub use change_log::{ChangeLogPoller, PollOutcome};
pub use crawler::{CrawlOutcome, Crawler};
#[cfg(feature = "watch")]
pub use os_watch::spawn_os_watcher;
pub use watcher::WatcherAdapter;
