//! In-memory identity store for testing.

use crate::backend::MetadataStore;
use crate::error::StoreResult;
use crate::index::RecordIndex;
use crate::record::IdentityRecord;
use crate::validate::validate_records;
use parking_lot::RwLock;
use reposync_events::RemoteId;
use std::path::Path;
use uuid::Uuid;

/// An in-memory identity store.
///
/// Nothing survives the process. Useful for tests and for sessions that
/// rebuild their records with a full crawl on every start.
///
/// # Example
///
/// ```rust
/// use reposync_store::{IdentityRecord, InMemoryStore, MetadataStore};
///
/// let store = InMemoryStore::new();
/// store.set_change_log_token(Some("42")).unwrap();
/// assert_eq!(store.change_log_token().unwrap().as_deref(), Some("42"));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    index: RwLock<RecordIndex>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store preloaded with records.
    ///
    /// Records that fail validation or collide with an earlier record are
    /// dropped.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = IdentityRecord>) -> Self {
        let (kept, _) = validate_records(records);
        let mut index = RecordIndex::new();
        for record in kept {
            index.insert(record);
        }
        Self {
            index: RwLock::new(index),
        }
    }
}

impl MetadataStore for InMemoryStore {
    fn get(&self, remote_id: &RemoteId) -> StoreResult<Option<IdentityRecord>> {
        Ok(self.index.read().get(remote_id).cloned())
    }

    fn get_by_local_uuid(&self, uuid: &Uuid) -> StoreResult<Option<IdentityRecord>> {
        Ok(self.index.read().get_by_uuid(uuid).cloned())
    }

    fn get_by_local_path(&self, path: &Path) -> StoreResult<Option<IdentityRecord>> {
        Ok(self.index.read().get_by_path(path).cloned())
    }

    fn save(&self, record: IdentityRecord) -> StoreResult<()> {
        let mut index = self.index.write();
        index.check(&record)?;
        index.insert(record);
        Ok(())
    }

    fn delete(&self, remote_id: &RemoteId) -> StoreResult<Option<IdentityRecord>> {
        Ok(self.index.write().remove(remote_id))
    }

    fn change_log_token(&self) -> StoreResult<Option<String>> {
        Ok(self.index.read().token().map(str::to_owned))
    }

    fn set_change_log_token(&self, token: Option<&str>) -> StoreResult<()> {
        self.index.write().set_token(token.map(str::to_owned));
        Ok(())
    }

    fn records(&self) -> StoreResult<Vec<IdentityRecord>> {
        Ok(self.index.read().records().cloned().collect())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.index.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::path::PathBuf;

    #[test]
    fn save_and_lookup_by_every_key() {
        let store = InMemoryStore::new();
        let uuid = Uuid::new_v4();
        store
            .save(IdentityRecord::file("doc-1", "a.txt", "a.txt").with_uuid(uuid))
            .unwrap();

        let id = RemoteId::new("doc-1");
        assert!(store.get(&id).unwrap().is_some());
        assert_eq!(store.get_by_local_uuid(&uuid).unwrap().unwrap().remote_id, id);
        assert_eq!(
            store.get_by_local_path(Path::new("a.txt")).unwrap().unwrap().remote_id,
            id
        );
        assert_eq!(store.len().unwrap(), 1);
        assert!(!store.is_empty().unwrap());
    }

    #[test]
    fn save_rejects_invalid_record() {
        let store = InMemoryStore::new();
        let err = store
            .save(IdentityRecord::file("doc-1", "../escape", "escape"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn delete_returns_previous() {
        let store = InMemoryStore::new();
        store.save(IdentityRecord::folder("f", "Cat", "Cat")).unwrap();
        let removed = store.delete(&RemoteId::new("f")).unwrap();
        assert_eq!(removed.unwrap().local_path, PathBuf::from("Cat"));
        assert!(store.delete(&RemoteId::new("f")).unwrap().is_none());
    }

    #[test]
    fn descendants_and_children() {
        let store = InMemoryStore::new();
        store
            .save(IdentityRecord::folder("f", "Cat", "Cat").with_parent("root"))
            .unwrap();
        store
            .save(IdentityRecord::file("d1", "Cat/a.txt", "a.txt").with_parent("f"))
            .unwrap();
        store
            .save(IdentityRecord::file("d2", "Catalog.txt", "Catalog.txt").with_parent("root"))
            .unwrap();

        let below = store.descendants_of(Path::new("Cat")).unwrap();
        assert_eq!(below.len(), 1);
        assert_eq!(below[0].remote_id.as_str(), "d1");

        let top = store.children_of(&RemoteId::new("root")).unwrap();
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn from_records_drops_collisions() {
        let store = InMemoryStore::from_records(vec![
            IdentityRecord::file("a", "x.txt", "x.txt"),
            IdentityRecord::file("b", "x.txt", "x.txt"),
        ]);
        assert_eq!(store.len().unwrap(), 1);
    }
}
