//! In-memory record index shared by every store implementation.

use crate::error::{StoreError, StoreResult};
use crate::record::IdentityRecord;
use reposync_events::RemoteId;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Records keyed by remote id, with unique secondary indexes.
#[derive(Debug, Default, Clone)]
pub(crate) struct RecordIndex {
    by_id: BTreeMap<RemoteId, IdentityRecord>,
    by_uuid: HashMap<Uuid, RemoteId>,
    by_path: HashMap<PathBuf, RemoteId>,
    token: Option<String>,
}

impl RecordIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, remote_id: &RemoteId) -> Option<&IdentityRecord> {
        self.by_id.get(remote_id)
    }

    pub(crate) fn get_by_uuid(&self, uuid: &Uuid) -> Option<&IdentityRecord> {
        self.by_uuid.get(uuid).and_then(|id| self.by_id.get(id))
    }

    pub(crate) fn get_by_path(&self, path: &Path) -> Option<&IdentityRecord> {
        self.by_path.get(path).and_then(|id| self.by_id.get(id))
    }

    /// Checks that `record` can be inserted without breaking uniqueness.
    pub(crate) fn check(&self, record: &IdentityRecord) -> StoreResult<()> {
        record.validate()?;

        if let Some(uuid) = &record.local_uuid {
            if let Some(owner) = self.by_uuid.get(uuid) {
                if owner != &record.remote_id {
                    return Err(StoreError::Constraint {
                        field: "local uuid",
                        value: uuid.to_string(),
                        owner: owner.to_string(),
                    });
                }
            }
        }
        if let Some(owner) = self.by_path.get(&record.local_path) {
            if owner != &record.remote_id {
                return Err(StoreError::Constraint {
                    field: "local path",
                    value: record.local_path.display().to_string(),
                    owner: owner.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Inserts a record that already passed [`RecordIndex::check`].
    pub(crate) fn insert(&mut self, record: IdentityRecord) {
        self.unlink(&record.remote_id);
        if let Some(uuid) = record.local_uuid {
            self.by_uuid.insert(uuid, record.remote_id.clone());
        }
        self.by_path
            .insert(record.local_path.clone(), record.remote_id.clone());
        self.by_id.insert(record.remote_id.clone(), record);
    }

    pub(crate) fn remove(&mut self, remote_id: &RemoteId) -> Option<IdentityRecord> {
        self.unlink(remote_id);
        self.by_id.remove(remote_id)
    }

    fn unlink(&mut self, remote_id: &RemoteId) {
        if let Some(previous) = self.by_id.get(remote_id) {
            if let Some(uuid) = &previous.local_uuid {
                self.by_uuid.remove(uuid);
            }
            self.by_path.remove(&previous.local_path);
        }
    }

    pub(crate) fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub(crate) fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.by_id.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }
}
