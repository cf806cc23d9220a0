//! Situation detection.
//!
//! Both sides of an object event are classified against the identity
//! record, independently and freshly on every call. Nothing is cached: a
//! concurrent edit may change the answer between detection and solving.

use crate::context::SyncContext;
use crate::error::SyncResult;
use reposync_events::{ObjectEvent, RemoteObject, RemoteState, Situation, SituationPair};
use reposync_store::IdentityRecord;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of classifying one event.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Local and remote situations.
    pub pair: SituationPair,
    /// The identity record the event refers to, if any.
    pub record: Option<IdentityRecord>,
    /// Where the local object currently lives, if it exists.
    pub local_path: Option<PathBuf>,
    /// The live remote object, if present.
    pub remote: Option<RemoteObject>,
}

impl Classification {
    /// Absolute local path the solvers should act on: the current location,
    /// else the event's path.
    pub fn target_path<'a>(&'a self, event: &'a ObjectEvent) -> Option<&'a Path> {
        self.local_path.as_deref().or(event.local())
    }
}

/// Computes the situation pair of object events.
#[derive(Debug, Clone)]
pub struct SituationDetector {
    ctx: Arc<SyncContext>,
}

impl SituationDetector {
    /// Creates a detector.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Classifies an event whose remote side is known.
    ///
    /// - no record, object present: `Added`
    /// - record, object gone: `Removed`
    /// - record, parent differs: `Moved`; same parent, name differs: `Renamed`
    /// - record, same place, content or change token differs: `Changed`
    /// - otherwise `None`
    pub fn classify(&self, event: &ObjectEvent) -> SyncResult<Classification> {
        let moved_from = event.moved_from.as_ref().map(|moved| moved.local_path.as_path());
        let record = self
            .ctx
            .find_record(event.effective_remote_id(), event.local(), moved_from)?;

        let local_path = self.current_local_path(event, record.as_ref())?;
        let local = match &record {
            Some(record) => self.classify_local(record, local_path.as_deref())?,
            None if local_path.is_some() => Situation::Added,
            None => Situation::None,
        };

        let remote_object = event.remote_object().cloned();
        let remote = match (&record, &event.remote) {
            (Some(record), RemoteState::Present(object)) => classify_remote(record, object),
            (Some(_), _) => Situation::Removed,
            (None, RemoteState::Present(_)) => Situation::Added,
            (None, _) => Situation::None,
        };

        Ok(Classification {
            pair: SituationPair::new(local, remote),
            record,
            local_path,
            remote: remote_object,
        })
    }

    fn current_local_path(
        &self,
        event: &ObjectEvent,
        record: Option<&IdentityRecord>,
    ) -> SyncResult<Option<PathBuf>> {
        if let Some(path) = event.local() {
            if self.ctx.local().metadata(path)?.is_some() {
                return Ok(Some(path.to_path_buf()));
            }
        }
        if let Some(record) = record {
            let path = self.ctx.local_path_of(record);
            if self.ctx.local().metadata(&path)?.is_some() {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    fn classify_local(&self, record: &IdentityRecord, current: Option<&Path>) -> SyncResult<Situation> {
        let Some(current) = current else {
            return Ok(Situation::Removed);
        };
        let Some(relative) = self.ctx.paths().relative(current) else {
            return Ok(Situation::Removed);
        };
        if relative != record.local_path {
            let parent = relative.parent().unwrap_or(Path::new(""));
            return Ok(if parent != record.local_parent() {
                Situation::Moved
            } else {
                Situation::Renamed
            });
        }
        if record.kind.is_file() {
            // Always hash: modification times are too coarse to trust
            let fingerprint = self.ctx.local().fingerprint(current)?;
            if record.fingerprint.as_ref() != Some(&fingerprint) {
                return Ok(Situation::Changed);
            }
        }
        Ok(Situation::None)
    }
}

fn classify_remote(record: &IdentityRecord, object: &RemoteObject) -> Situation {
    if object.parent_id != record.parent_remote_id {
        Situation::Moved
    } else if object.name != record.name {
        Situation::Renamed
    } else if record.change_token.as_deref() != Some(object.change_token.as_str()) {
        Situation::Changed
    } else {
        Situation::None
    }
}
