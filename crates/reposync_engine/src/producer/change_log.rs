//! Incremental remote changes.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::retry::with_retry;
use reposync_events::{dedup_latest, ContentChangeEvent, SyncEvent};
use tracing::{debug, info, warn};

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Changes since the token, one event per object, and the token to
    /// store once the cycle completes.
    Changes {
        /// Content-change events in change-log order.
        events: Vec<SyncEvent>,
        /// Token after the last page.
        token: String,
    },
    /// No usable token; the cycle must crawl instead.
    FullCrawlRequired,
}

/// Reads the remote change log page by page.
///
/// Nothing is stored here: the caller persists the returned token only
/// after the whole cycle went through.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeLogPoller;

impl ChangeLogPoller {
    /// Creates a poller.
    pub fn new() -> Self {
        Self
    }

    /// Collects every change after `token`.
    ///
    /// Pages are followed until exhausted; an object listed more than once
    /// keeps only its latest entry. A missing or stale token yields
    /// [`PollOutcome::FullCrawlRequired`].
    ///
    /// # Errors
    ///
    /// Returns the remote error once retries are exhausted, or
    /// [`SyncError::Suspended`] if the session is paused mid-poll.
    pub fn poll(&self, ctx: &SyncContext, token: Option<&str>) -> SyncResult<PollOutcome> {
        let Some(token) = token else {
            info!("No change-log token stored, full crawl required");
            return Ok(PollOutcome::FullCrawlRequired);
        };

        let config = ctx.config();
        let mut current = token.to_string();
        let mut entries = Vec::new();
        let mut pages = 0usize;
        loop {
            ctx.check_active()?;
            let page = match with_retry(&config.retry, "get_changes", || {
                ctx.remote().get_changes(&current, config.page_size)
            }) {
                Ok(page) => page,
                Err(SyncError::StaleChangeToken) => {
                    info!(token = %current, "Change-log token rejected, full crawl required");
                    return Ok(PollOutcome::FullCrawlRequired);
                }
                Err(e) => return Err(e),
            };
            pages += 1;
            entries.extend(page.entries);
            if !page.has_more {
                current = page.next_token;
                break;
            }
            if page.next_token == current {
                warn!(token = %current, "Change log did not advance, stopping");
                break;
            }
            current = page.next_token;
        }

        let total = entries.len();
        let events: Vec<SyncEvent> = dedup_latest(entries)
            .into_iter()
            .map(|entry| {
                SyncEvent::ContentChange(ContentChangeEvent {
                    remote_id: entry.remote_id,
                    kind: entry.kind,
                })
            })
            .collect();
        debug!(pages, entries = total, events = events.len(), "Polled change log");
        Ok(PollOutcome::Changes {
            events,
            token: current,
        })
    }
}
