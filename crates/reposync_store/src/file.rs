//! Journal-backed identity store for persistent sessions.

use crate::backend::MetadataStore;
use crate::error::{StoreError, StoreResult};
use crate::index::RecordIndex;
use crate::journal::{decode_journal, encode_entry, replay_entries, JournalEntry};
use crate::record::IdentityRecord;
use crate::validate::{validate_records, ValidationReport};
use fs2::FileExt;
use parking_lot::Mutex;
use reposync_events::RemoteId;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tuning knobs for [`FileStore`].
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Call `sync_data` after every append.
    pub sync_writes: bool,
    /// Compact once this many entries were appended since the last
    /// compaction and they outnumber the live records two to one.
    /// `0` disables automatic compaction.
    pub compact_after: usize,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            sync_writes: true,
            compact_after: 1024,
        }
    }
}

impl FileStoreOptions {
    /// Sets whether appends are synced to disk.
    #[must_use]
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub fn with_compact_after(mut self, entries: usize) -> Self {
        self.compact_after = entries;
        self
    }
}

/// Statistics from a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Journal size before compaction.
    pub bytes_before: u64,
    /// Journal size after compaction.
    pub bytes_after: u64,
    /// Records written to the compacted journal.
    pub records: usize,
}

#[derive(Debug)]
struct JournalState {
    index: RecordIndex,
    file: File,
    len: u64,
    appended: usize,
}

/// An identity store persisted as an append-only journal.
///
/// Every mutation appends one CRC-framed CBOR entry. On open the journal is
/// replayed, a torn tail from an interrupted write is truncated, and the
/// resulting records go through validation. Compaction rewrites the live
/// records into a fresh journal and atomically replaces the old one.
///
/// Only one process may open a store at a time; an exclusive lock is held
/// on a sibling `.lock` file for the lifetime of the value.
///
/// # Example
///
/// ```no_run
/// use reposync_store::{FileStore, IdentityRecord, MetadataStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("identity.journal")).unwrap();
/// store.save(IdentityRecord::folder("f-1", "Cat", "Cat")).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_file: File,
    options: FileStoreOptions,
    state: Mutex<JournalState>,
    last_validation: ValidationReport,
}

impl FileStore {
    /// Opens or creates a store with default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be opened, is locked by
    /// another process, or contains an intact but undecodable frame.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with(path, FileStoreOptions::default())
    }

    /// Opens or creates a store with the given options.
    ///
    /// # Errors
    ///
    /// See [`FileStore::open`].
    pub fn open_with(path: &Path, options: FileStoreOptions) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked(path.to_path_buf()))?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let scan = decode_journal(&data)?;

        if scan.has_torn_tail() {
            warn!(
                path = %path.display(),
                torn_bytes = scan.torn_bytes,
                "Truncating torn journal tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }

        let entry_count = scan.entries.len();
        let (records, token) = replay_entries(scan.entries);
        let (kept, report) = validate_records(records);

        let mut index = RecordIndex::new();
        for record in kept {
            index.insert(record);
        }
        index.set_token(token);

        file.seek(SeekFrom::End(0))?;
        let len = file.metadata()?.len();

        info!(
            path = %path.display(),
            records = index.len(),
            entries = entry_count,
            dropped = report.dropped.len(),
            "Opened identity store"
        );

        let store = Self {
            path: path.to_path_buf(),
            lock_file,
            options,
            state: Mutex::new(JournalState {
                index,
                file,
                len,
                appended: entry_count,
            }),
            last_validation: report,
        };

        if !store.last_validation.is_clean() {
            store.compact()?;
        }
        Ok(store)
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the validation report from the last open.
    #[must_use]
    pub fn last_validation(&self) -> &ValidationReport {
        &self.last_validation
    }

    /// Returns the current journal size in bytes.
    #[must_use]
    pub fn journal_len(&self) -> u64 {
        self.state.lock().len
    }

    /// Forces appended entries to disk.
    ///
    /// Only needed when the store was opened without `sync_writes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn flush(&self) -> StoreResult<()> {
        let state = self.state.lock();
        state.file.sync_all()?;
        Ok(())
    }

    /// Rewrites the journal with only the live records and token.
    ///
    /// # Errors
    ///
    /// Returns an error if the compacted journal cannot be written or
    /// swapped in. The existing journal is left untouched in that case.
    pub fn compact(&self) -> StoreResult<CompactionStats> {
        let mut state = self.state.lock();
        self.compact_locked(&mut state)
    }

    fn compact_locked(&self, state: &mut JournalState) -> StoreResult<CompactionStats> {
        let bytes_before = state.len;
        let tmp_path = self.path.with_extension("compact");

        let mut buffer = Vec::new();
        buffer.extend(encode_entry(&JournalEntry::Token(
            state.index.token().map(str::to_owned),
        ))?);
        let mut records = 0;
        for record in state.index.records() {
            buffer.extend(encode_entry(&JournalEntry::Put(record.clone()))?);
            records += 1;
        }

        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&buffer)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        state.file = file;
        state.len = buffer.len() as u64;
        state.appended = records + 1;

        let stats = CompactionStats {
            bytes_before,
            bytes_after: state.len,
            records,
        };
        debug!(
            path = %self.path.display(),
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            records = stats.records,
            "Compacted identity journal"
        );
        Ok(stats)
    }

    fn append(&self, state: &mut JournalState, entry: &JournalEntry) -> StoreResult<()> {
        let frame = encode_entry(entry)?;
        state.file.write_all(&frame)?;
        state.file.flush()?;
        if self.options.sync_writes {
            state.file.sync_data()?;
        }
        state.len += frame.len() as u64;
        state.appended += 1;
        Ok(())
    }

    fn maybe_compact(&self, state: &mut JournalState) -> StoreResult<()> {
        let threshold = self.options.compact_after;
        if threshold > 0 && state.appended >= threshold && state.appended > 2 * state.index.len() {
            self.compact_locked(state)?;
        }
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock_file);
    }
}

impl MetadataStore for FileStore {
    fn get(&self, remote_id: &RemoteId) -> StoreResult<Option<IdentityRecord>> {
        Ok(self.state.lock().index.get(remote_id).cloned())
    }

    fn get_by_local_uuid(&self, uuid: &Uuid) -> StoreResult<Option<IdentityRecord>> {
        Ok(self.state.lock().index.get_by_uuid(uuid).cloned())
    }

    fn get_by_local_path(&self, path: &Path) -> StoreResult<Option<IdentityRecord>> {
        Ok(self.state.lock().index.get_by_path(path).cloned())
    }

    fn save(&self, record: IdentityRecord) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.index.check(&record)?;
        let entry = JournalEntry::Put(record);
        self.append(&mut state, &entry)?;
        if let JournalEntry::Put(record) = entry {
            state.index.insert(record);
        }
        self.maybe_compact(&mut state)
    }

    fn delete(&self, remote_id: &RemoteId) -> StoreResult<Option<IdentityRecord>> {
        let mut state = self.state.lock();
        if state.index.get(remote_id).is_none() {
            return Ok(None);
        }
        self.append(&mut state, &JournalEntry::Delete(remote_id.clone()))?;
        let removed = state.index.remove(remote_id);
        self.maybe_compact(&mut state)?;
        Ok(removed)
    }

    fn change_log_token(&self) -> StoreResult<Option<String>> {
        Ok(self.state.lock().index.token().map(str::to_owned))
    }

    fn set_change_log_token(&self, token: Option<&str>) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.index.token() == token {
            return Ok(());
        }
        let owned = token.map(str::to_owned);
        self.append(&mut state, &JournalEntry::Token(owned.clone()))?;
        state.index.set_token(owned);
        self.maybe_compact(&mut state)
    }

    fn records(&self) -> StoreResult<Vec<IdentityRecord>> {
        Ok(self.state.lock().index.records().cloned().collect())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.state.lock().index.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn journal_path(dir: &TempDir) -> PathBuf {
        dir.path().join("identity.journal")
    }

    #[test]
    fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let uuid = Uuid::new_v4();

        {
            let store = FileStore::open(&path).unwrap();
            store
                .save(IdentityRecord::file("doc-1", "a.txt", "a.txt").with_uuid(uuid))
                .unwrap();
            store.save(IdentityRecord::folder("f", "Cat", "Cat")).unwrap();
            store.delete(&RemoteId::new("f")).unwrap();
            store.set_change_log_token(Some("9")).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.get_by_local_uuid(&uuid).unwrap().is_some());
        assert_eq!(store.change_log_token().unwrap().as_deref(), Some("9"));
        assert!(store.last_validation().is_clean());
    }

    #[test]
    fn second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let _first = FileStore::open(&path).unwrap();
        let second = FileStore::open(&path);
        assert!(matches!(second, Err(StoreError::Locked(_))));
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        {
            let store = FileStore::open(&path).unwrap();
            store.save(IdentityRecord::file("a", "a.txt", "a.txt")).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"RSJ1\x01\xff\xff").unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.journal_len(), intact);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);
    }

    #[test]
    fn compaction_keeps_live_state() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let store = FileStore::open_with(
            &path,
            FileStoreOptions::default()
                .with_sync_writes(false)
                .with_compact_after(0),
        )
        .unwrap();

        for round in 0..20 {
            store
                .save(
                    IdentityRecord::file("doc", "a.txt", "a.txt")
                        .with_change_token(round.to_string()),
                )
                .unwrap();
        }
        store.set_change_log_token(Some("20")).unwrap();

        let stats = store.compact().unwrap();
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(stats.records, 1);
        drop(store);

        let store = FileStore::open(&path).unwrap();
        let record = store.get(&RemoteId::new("doc")).unwrap().unwrap();
        assert_eq!(record.change_token.as_deref(), Some("19"));
        assert_eq!(store.change_log_token().unwrap().as_deref(), Some("20"));
    }

    #[test]
    fn automatic_compaction_bounds_growth() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let store = FileStore::open_with(
            &path,
            FileStoreOptions::default()
                .with_sync_writes(false)
                .with_compact_after(8),
        )
        .unwrap();

        for round in 0..100 {
            store
                .set_change_log_token(Some(&round.to_string()))
                .unwrap();
        }
        let small = encode_entry(&JournalEntry::Token(Some("99".into())))
            .unwrap()
            .len() as u64;
        assert!(store.journal_len() <= small * 8);
    }

    #[test]
    fn failed_constraint_is_not_journaled() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let store = FileStore::open(&path).unwrap();
        store.save(IdentityRecord::file("a", "x.txt", "x.txt")).unwrap();
        let before = store.journal_len();

        let err = store.save(IdentityRecord::file("b", "x.txt", "x.txt"));
        assert!(matches!(err, Err(StoreError::Constraint { .. })));
        assert_eq!(store.journal_len(), before);
    }
}
