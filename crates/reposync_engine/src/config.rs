//! Configuration for a sync session.

use crate::ignore::IgnoreRules;
use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one synchronized repository.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Local directory kept in sync.
    pub local_root: PathBuf,
    /// Remote folder path mirrored into `local_root` (`/` for the whole repository).
    pub remote_root: String,
    /// Human readable repository name, used in logs.
    pub repository: String,
    /// Maximum number of change-log entries requested per page.
    pub page_size: usize,
    /// Interval for automatic incremental polls.
    pub poll_interval: Option<Duration>,
    /// Deadline handed to remote clients for each round trip.
    pub request_timeout: Duration,
    /// Retry configuration for remote calls made by producers.
    pub retry: RetryConfig,
    /// Log and continue on handler errors instead of failing the drain.
    pub swallow_handler_errors: bool,
    /// Suffix inserted before the extension of conflict copies.
    pub conflict_suffix: String,
    /// Paths never synchronized.
    pub ignore: IgnoreRules,
    /// How long a solver's own write suppresses watcher notifications.
    pub self_write_window: Duration,
}

impl SyncConfig {
    /// Creates a configuration for `local_root` mirroring the remote root.
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            remote_root: "/".into(),
            repository: "default".into(),
            page_size: 100,
            poll_interval: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            swallow_handler_errors: true,
            conflict_suffix: " (conflict)".into(),
            ignore: IgnoreRules::default(),
            self_write_window: Duration::from_secs(2),
        }
    }

    /// Sets the remote folder mirrored locally.
    pub fn with_remote_root(mut self, remote_root: impl Into<String>) -> Self {
        self.remote_root = remote_root.into();
        self
    }

    /// Sets the repository name.
    pub fn with_repository(mut self, name: impl Into<String>) -> Self {
        self.repository = name.into();
        self
    }

    /// Sets the change-log page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Enables periodic polling.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Sets the remote request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets whether handler errors are swallowed.
    pub fn with_swallow_handler_errors(mut self, swallow: bool) -> Self {
        self.swallow_handler_errors = swallow;
        self
    }

    /// Sets the conflict-copy suffix.
    pub fn with_conflict_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.conflict_suffix = suffix.into();
        self
    }

    /// Sets the ignore rules.
    pub fn with_ignore(mut self, ignore: IgnoreRules) -> Self {
        self.ignore = ignore;
        self
    }

    /// Sets the self-write suppression window.
    pub fn with_self_write_window(mut self, window: Duration) -> Self {
        self.self_write_window = window;
        self
    }
}

/// Backoff for the remote round trips producers make: the head token,
/// change-log pages and crawl listings.
///
/// Only retryable failures ([`crate::SyncError::is_retryable`]) are
/// retried. Once the attempts run out the cycle reports the failure and
/// keeps its stored change-log token, so the next cycle polls the same
/// range again.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per remote call, the first one included.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound of the wait, before jitter.
    pub max_delay: Duration,
    /// Growth of the wait from one attempt to the next.
    pub backoff_multiplier: f64,
    /// Adds a random extra of up to a quarter of the wait.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Up to `max_attempts` tries per call, waiting 200ms, then twice as
    /// long each time, never more than 30s.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A single attempt per call; failures reach the cycle report at once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the wait before the second attempt.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the ceiling of the wait.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Wait before try number `attempt`; the first call (0) never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(retries) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let growth = self
            .backoff_multiplier
            .powi(i32::try_from(retries).unwrap_or(i32::MAX));
        let seconds = (self.initial_delay.as_secs_f64() * growth)
            .min(self.max_delay.as_secs_f64())
            .max(0.0);
        let capped = Duration::try_from_secs_f64(seconds).unwrap_or(self.max_delay);
        if !self.add_jitter || capped.is_zero() {
            return capped;
        }
        let extra = 0.25 * rand::thread_rng().gen_range(0.0..1.0);
        Duration::try_from_secs_f64(capped.as_secs_f64() * (1.0 + extra)).unwrap_or(capped)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("/tmp/sync")
            .with_remote_root("/Workspaces/Team")
            .with_repository("team")
            .with_page_size(0)
            .with_request_timeout(Duration::from_secs(5))
            .with_conflict_suffix(" [conflict]")
            .with_swallow_handler_errors(false);

        assert_eq!(config.local_root, PathBuf::from("/tmp/sync"));
        assert_eq!(config.remote_root, "/Workspaces/Team");
        assert_eq!(config.repository, "team");
        assert_eq!(config.page_size, 1);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.conflict_suffix, " [conflict]");
        assert!(!config.swallow_handler_errors);
        assert!(config.poll_interval.is_none());
    }

    #[test]
    fn default_session_retries_remote_calls() {
        let config = SyncConfig::new("/tmp/sync");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.delay_for_attempt(0), Duration::ZERO);
        assert!(config.retry.delay_for_attempt(1) >= Duration::from_millis(200));
        assert!(config.retry.delay_for_attempt(1) <= Duration::from_millis(250));
    }

    #[test]
    fn no_retry_never_waits() {
        let config = SyncConfig::new("/tmp/sync").with_retry(RetryConfig::no_retry());
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.delay_for_attempt(3), Duration::ZERO);
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
    }

    #[test]
    fn backoff_grows_up_to_the_ceiling() {
        let config = RetryConfig::new(6)
            .with_max_delay(Duration::from_secs(1))
            .with_jitter(false);
        let delays: Vec<_> = (1..=5).map(|attempt| config.delay_for_attempt(attempt)).collect();
        assert_eq!(
            delays,
            [200, 400, 800, 1000, 1000].map(Duration::from_millis)
        );
    }

    proptest! {
        #[test]
        fn delay_stays_under_ceiling_plus_jitter(
            attempt in 0u32..64,
            initial_ms in 0u64..5_000,
            max_ms in 0u64..60_000,
            multiplier in 1.0f64..10.0,
            jitter in any::<bool>(),
        ) {
            let config = RetryConfig::new(8)
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(max_ms))
                .with_backoff_multiplier(multiplier)
                .with_jitter(jitter);
            let delay = config.delay_for_attempt(attempt);
            let ceiling = Duration::from_millis(max_ms).mul_f64(1.25) + Duration::from_micros(1);
            prop_assert!(delay <= ceiling);
            if attempt == 0 {
                prop_assert_eq!(delay, Duration::ZERO);
            }
            if !jitter && attempt > 0 {
                prop_assert!(config.delay_for_attempt(attempt + 1) >= delay);
            }
        }
    }
}
