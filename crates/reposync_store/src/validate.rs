//! Validation pass over loaded records.

use crate::error::StoreError;
use crate::record::IdentityRecord;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

/// Outcome of validating a set of records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Records that passed validation.
    pub valid: usize,
    /// Remote ids of records dropped, with the reason.
    pub dropped: Vec<(String, String)>,
}

impl ValidationReport {
    /// Returns true if every record was kept.
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty()
    }
}

/// Filters out records that violate record invariants or uniqueness.
///
/// When two records claim the same UUID or path, the first in iteration
/// order wins and the later one is dropped. Dropped records behave as if
/// they were never stored.
pub fn validate_records(
    records: impl IntoIterator<Item = IdentityRecord>,
) -> (Vec<IdentityRecord>, ValidationReport) {
    let mut report = ValidationReport::default();
    let mut kept = Vec::new();
    let mut uuids: HashSet<Uuid> = HashSet::new();
    let mut paths: HashMap<PathBuf, String> = HashMap::new();

    for record in records {
        if let Err(err) = record.validate() {
            let reason = match err {
                StoreError::InvalidRecord { reason, .. } => reason,
                other => other.to_string(),
            };
            drop_record(&mut report, &record, reason);
            continue;
        }
        if let Some(uuid) = record.local_uuid {
            if !uuids.insert(uuid) {
                drop_record(&mut report, &record, format!("duplicate local uuid {uuid}"));
                continue;
            }
        }
        if let Some(owner) = paths.get(&record.local_path) {
            let reason = format!("local path already owned by {owner}");
            if let Some(uuid) = &record.local_uuid {
                uuids.remove(uuid);
            }
            drop_record(&mut report, &record, reason);
            continue;
        }
        paths.insert(record.local_path.clone(), record.remote_id.to_string());
        kept.push(record);
    }

    report.valid = kept.len();
    (kept, report)
}

fn drop_record(report: &mut ValidationReport, record: &IdentityRecord, reason: String) {
    warn!(
        remote_id = %record.remote_id,
        path = %record.local_path.display(),
        reason = %reason,
        "Dropping invalid identity record"
    );
    report.dropped.push((record.remote_id.to_string(), reason));
}
