//! Compact command implementation.

use super::{format_size, CliError, ReplayedJournal};
use reposync_store::FileStore;
use std::path::Path;
use tracing::info;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), CliError> {
    if dry_run {
        let journal = ReplayedJournal::load(path)?;
        println!("Dry run: would compact {}", path.display());
        println!("  Current size: {}", format_size(journal.bytes));
        println!("  Live records: {}", journal.records.len());
        println!("  Dead frames:  {}", journal.dead_frames());
        return Ok(());
    }

    if !path.exists() {
        return Err(CliError::NoJournal(path.to_path_buf()));
    }
    let store = FileStore::open(path)?;
    let stats = store.compact()?;
    info!(
        path = %path.display(),
        records = stats.records,
        "Compaction finished"
    );
    println!(
        "Compacted {}: {} -> {} ({} records)",
        path.display(),
        format_size(stats.bytes_before),
        format_size(stats.bytes_after),
        stats.records
    );
    Ok(())
}
