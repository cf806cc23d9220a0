//! Verify command implementation.

use super::{CliError, OutputFormat, ReplayedJournal};
use serde::Serialize;
use std::path::Path;

/// Verification result.
#[derive(Debug, Serialize)]
pub struct VerifyResult {
    /// Intact frames checked.
    pub frames_checked: usize,
    /// Records that passed validation.
    pub valid_records: usize,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks the journal at `path` without modifying it.
///
/// A torn tail and records dropped by validation are both reported; the
/// store would repair the former and ignore the latter on the next open.
///
/// # Errors
///
/// Returns an error only if the journal cannot be read at all. An intact
/// frame that fails to decode is reported as a problem.
pub fn verify(path: &Path) -> Result<VerifyResult, CliError> {
    let journal = match ReplayedJournal::load(path) {
        Ok(journal) => journal,
        Err(CliError::Store(e)) => {
            return Ok(VerifyResult {
                frames_checked: 0,
                valid_records: 0,
                errors: vec![e.to_string()],
            })
        }
        Err(e) => return Err(e),
    };

    let mut errors = Vec::new();
    if journal.torn_bytes > 0 {
        errors.push(format!(
            "torn tail of {} bytes after offset {}",
            journal.torn_bytes,
            journal.bytes - journal.torn_bytes
        ));
    }
    for (remote_id, reason) in &journal.validation.dropped {
        errors.push(format!("record {remote_id}: {reason}"));
    }

    Ok(VerifyResult {
        frames_checked: journal.frames,
        valid_records: journal.validation.valid,
        errors,
    })
}

/// Runs the verify command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), CliError> {
    let result = verify(path)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            println!("Verifying identity journal at {}", path.display());
            println!();
            println!("  Frames checked: {}", result.frames_checked);
            println!("  Valid records:  {}", result.valid_records);
            for error in &result.errors {
                println!("  - {error}");
            }
            println!();
            if result.is_ok() {
                println!("✓ Journal verification passed");
            } else {
                println!("✗ Journal verification failed");
            }
        }
    }

    if result.is_ok() {
        Ok(())
    } else {
        Err(CliError::VerificationFailed(result.errors.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_store::{encode_entry, FileStore, IdentityRecord, JournalEntry, MetadataStore};
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn journal(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("identity.journal");
        let store = FileStore::open(&path).unwrap();
        store.save(IdentityRecord::folder("f-1", "Cat", "Cat")).unwrap();
        path
    }

    fn append(path: &Path, bytes: &[u8]) {
        fs::OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap()
            .write_all(bytes)
            .unwrap();
    }

    #[test]
    fn clean_journal_passes() {
        let dir = TempDir::new().unwrap();
        let path = journal(&dir);
        let result = verify(&path).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.valid_records, 1);
    }

    #[test]
    fn torn_tail_is_a_problem() {
        let dir = TempDir::new().unwrap();
        let path = journal(&dir);
        append(&path, b"RSJ");
        let result = verify(&path).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("torn tail of 3 bytes"));
    }

    #[test]
    fn duplicate_path_is_a_problem() {
        let dir = TempDir::new().unwrap();
        let path = journal(&dir);
        // Bypasses the store's constraint check
        let duplicate = IdentityRecord::folder("f-2", "Cat", "Cat");
        append(&path, &encode_entry(&JournalEntry::Put(duplicate)).unwrap());

        let result = verify(&path).unwrap();
        assert_eq!(result.valid_records, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("record f-2"));
    }
}
