//! Remote change-log pages.

use crate::object::RemoteId;
use std::collections::HashSet;

/// Kind of change reported by the remote change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteChangeKind {
    /// Object was created.
    Created,
    /// Object content or properties were updated (includes moves and renames).
    Updated,
    /// Object was deleted.
    Deleted,
    /// Object permissions changed.
    Security,
}

/// A single entry of the remote change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEntry {
    /// Object the change applies to.
    pub remote_id: RemoteId,
    /// Kind of change.
    pub kind: RemoteChangeKind,
}

impl ChangeLogEntry {
    /// Creates a change-log entry.
    pub fn new(remote_id: impl Into<RemoteId>, kind: RemoteChangeKind) -> Self {
        Self {
            remote_id: remote_id.into(),
            kind,
        }
    }
}

/// One page of a change-log response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogPage {
    /// Entries in change order.
    pub entries: Vec<ChangeLogEntry>,
    /// Token to request the following page (or the next cycle).
    pub next_token: String,
    /// Whether more entries are available after this page.
    pub has_more: bool,
}

impl ChangeLogPage {
    /// Creates a page.
    pub fn new(entries: Vec<ChangeLogEntry>, next_token: impl Into<String>, has_more: bool) -> Self {
        Self {
            entries,
            next_token: next_token.into(),
            has_more,
        }
    }
}

/// Collapses repeated entries for the same object, keeping only the latest.
///
/// The same object can show up on adjacent pages when changes land while a
/// poll is paging. The surviving entries keep the position of their last
/// occurrence.
pub fn dedup_latest(entries: Vec<ChangeLogEntry>) -> Vec<ChangeLogEntry> {
    let mut seen = HashSet::new();
    let mut latest: Vec<ChangeLogEntry> = entries
        .into_iter()
        .rev()
        .filter(|entry| seen.insert(entry.remote_id.clone()))
        .collect();
    latest.reverse();
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn dedup_keeps_last_occurrence() {
        let entries = vec![
            ChangeLogEntry::new("a", RemoteChangeKind::Created),
            ChangeLogEntry::new("b", RemoteChangeKind::Created),
            ChangeLogEntry::new("a", RemoteChangeKind::Updated),
            ChangeLogEntry::new("c", RemoteChangeKind::Created),
            ChangeLogEntry::new("b", RemoteChangeKind::Deleted),
        ];

        let deduped = dedup_latest(entries);
        assert_eq!(
            deduped,
            vec![
                ChangeLogEntry::new("a", RemoteChangeKind::Updated),
                ChangeLogEntry::new("c", RemoteChangeKind::Created),
                ChangeLogEntry::new("b", RemoteChangeKind::Deleted),
            ]
        );
    }

    #[test]
    fn dedup_of_empty_is_empty() {
        assert!(dedup_latest(Vec::new()).is_empty());
    }

    proptest! {
        #[test]
        fn dedup_leaves_one_entry_per_object(ids in prop::collection::vec(0u8..6, 0..40)) {
            let entries: Vec<_> = ids
                .iter()
                .map(|id| ChangeLogEntry::new(id.to_string(), RemoteChangeKind::Updated))
                .collect();
            let deduped = dedup_latest(entries);

            let unique: HashSet<_> = ids.iter().collect();
            prop_assert_eq!(deduped.len(), unique.len());
            let distinct: HashSet<_> = deduped.iter().map(|e| e.remote_id.clone()).collect();
            prop_assert_eq!(distinct.len(), deduped.len());
        }
    }
}
