//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod verify;

use clap::ValueEnum;
use reposync_store::{
    decode_journal, replay_entries, validate_records, IdentityRecord, StoreError, ValidationReport,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// The command needs `--path`.
    #[error("journal path required for {0}")]
    MissingPath(&'static str),

    /// Nothing exists at the given path.
    #[error("no identity journal found at {0}")]
    NoJournal(PathBuf),

    /// The journal failed verification.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Output could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// A journal replayed in memory, without opening (and repairing) the store.
#[derive(Debug)]
pub struct ReplayedJournal {
    /// Journal size in bytes.
    pub bytes: u64,
    /// Number of intact frames.
    pub frames: usize,
    /// Trailing bytes that do not form a valid frame.
    pub torn_bytes: u64,
    /// Records that survive replay and validation, ordered by remote id.
    pub records: Vec<IdentityRecord>,
    /// Stored change-log token.
    pub token: Option<String>,
    /// Outcome of the validation pass.
    pub validation: ValidationReport,
}

impl ReplayedJournal {
    /// Reads and replays the journal at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::NoJournal`] if the file does not exist, or a
    /// store error if an intact frame cannot be decoded.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CliError::NoJournal(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let scan = decode_journal(&data)?;
        let frames = scan.entries.len();
        let (records, token) = replay_entries(scan.entries);
        let (records, validation) = validate_records(records);

        Ok(Self {
            bytes: data.len() as u64,
            frames,
            torn_bytes: scan.torn_bytes,
            records,
            token,
            validation,
        })
    }

    /// Frames that no longer contribute to the live state.
    pub fn dead_frames(&self) -> usize {
        let live = self.records.len() + self.validation.dropped.len() + 1;
        self.frames.saturating_sub(live)
    }
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
