//! Retry with backoff for producer-level remote calls.

use crate::config::RetryConfig;
use crate::error::SyncResult;
use std::thread;
use tracing::warn;

/// Runs `op`, retrying retryable failures with exponential backoff.
///
/// Non-retryable errors are returned immediately; the last retryable error
/// is returned once the attempts are exhausted.
pub fn with_retry<T>(
    config: &RetryConfig,
    operation: &str,
    mut op: impl FnMut() -> SyncResult<T>,
) -> SyncResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < config.max_attempts => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying remote call"
                );
                thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}
