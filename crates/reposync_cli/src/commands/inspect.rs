//! Inspect command implementation.

use super::{format_size, CliError, OutputFormat, ReplayedJournal};
use reposync_events::ObjectKind;
use reposync_store::IdentityRecord;
use serde::Serialize;
use std::path::Path;

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Intact frames.
    pub frames: usize,
    /// Frames superseded by later ones.
    pub dead_frames: usize,
    /// Trailing bytes of an interrupted append.
    pub torn_bytes: u64,
    /// Live file records.
    pub files: usize,
    /// Live folder records.
    pub folders: usize,
    /// Records dropped by validation.
    pub dropped: usize,
    /// Stored change-log token.
    pub change_log_token: Option<String>,
    /// Record listing (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<RecordRow>>,
}

/// One identity record, flattened for display.
#[derive(Debug, Serialize)]
pub struct RecordRow {
    /// Remote identifier.
    pub remote_id: String,
    /// `file` or `folder`.
    pub kind: String,
    /// Path relative to the sync root.
    pub local_path: String,
    /// Local UUID.
    pub local_uuid: Option<String>,
    /// Remote change token.
    pub change_token: Option<String>,
    /// Content fingerprint.
    pub fingerprint: Option<String>,
}

impl From<&IdentityRecord> for RecordRow {
    fn from(record: &IdentityRecord) -> Self {
        Self {
            remote_id: record.remote_id.to_string(),
            kind: record.kind.to_string(),
            local_path: record.local_path.display().to_string(),
            local_uuid: record.local_uuid.map(|uuid| uuid.to_string()),
            change_token: record.change_token.clone(),
            fingerprint: record
                .fingerprint
                .as_ref()
                .map(|fingerprint| fingerprint.as_str().to_string()),
        }
    }
}

/// Builds the inspection result for the journal at `path`.
///
/// # Errors
///
/// See [`ReplayedJournal::load`].
pub fn inspect(path: &Path, list_records: bool) -> Result<InspectResult, CliError> {
    let journal = ReplayedJournal::load(path)?;
    let files = journal
        .records
        .iter()
        .filter(|record| record.kind == ObjectKind::File)
        .count();

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_bytes: journal.bytes,
        frames: journal.frames,
        dead_frames: journal.dead_frames(),
        torn_bytes: journal.torn_bytes,
        files,
        folders: journal.records.len() - files,
        dropped: journal.validation.dropped.len(),
        change_log_token: journal.token.clone(),
        records: list_records.then(|| journal.records.iter().map(RecordRow::from).collect()),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, list_records: bool, format: OutputFormat) -> Result<(), CliError> {
    let result = inspect(path, list_records)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("RepoSync Identity Store");
    println!("=======================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Size:        {}", format_size(result.journal_bytes));
    println!("  Frames:      {}", result.frames);
    println!("  Dead frames: {}", result.dead_frames);
    if result.torn_bytes > 0 {
        println!("  Torn tail:   {} bytes", result.torn_bytes);
    }
    println!();
    println!("Records:");
    println!("  Files:   {}", result.files);
    println!("  Folders: {}", result.folders);
    if result.dropped > 0 {
        println!("  Invalid: {}", result.dropped);
    }
    println!(
        "  Change-log token: {}",
        result.change_log_token.as_deref().unwrap_or("(none)")
    );

    if let Some(records) = &result.records {
        println!();
        for row in records {
            println!(
                "  [{}] {} {} uuid={}",
                row.remote_id,
                row.kind,
                row.local_path,
                row.local_uuid.as_deref().unwrap_or("-")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_events::Fingerprint;
    use reposync_store::{FileStore, MetadataStore};
    use tempfile::TempDir;

    #[test]
    fn counts_files_and_folders() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity.journal");
        {
            let store = FileStore::open(&path).unwrap();
            store.save(IdentityRecord::folder("f-1", "Cat", "Cat")).unwrap();
            let mut file = IdentityRecord::file("f-2", "Cat/kitten.txt", "kitten.txt");
            file.fingerprint = Some(Fingerprint::of_bytes(b"meow"));
            store.save(file).unwrap();
        }

        let result = inspect(&path, true).unwrap();
        assert_eq!(result.files, 1);
        assert_eq!(result.folders, 1);
        assert!(result.change_log_token.is_none());
        let rows = result.records.unwrap();
        assert_eq!(rows.len(), 2);
        let file = rows.iter().find(|row| row.kind == "file").unwrap();
        assert_eq!(
            file.fingerprint.as_deref(),
            Some(Fingerprint::of_bytes(b"meow").as_str())
        );

        let json = serde_json::to_value(inspect(&path, false).unwrap()).unwrap();
        assert!(json.get("records").is_none());
    }
}
