//! Property-based test generators using proptest.
//!
//! Mutations target a single tracked file inside a small fixed layout, so
//! generated sequences always apply cleanly: names never collide with the
//! layout's folders, and operations on a deleted object are skipped.

use crate::fixtures::TestRepository;
use proptest::prelude::*;
use reposync_events::{ChangeLogEntry, RemoteChangeKind};

/// Folders present before any mutation.
pub const LAYOUT_FOLDERS: [&str; 2] = ["docs", "archive"];

/// Names the tracked file can take.
pub const FILE_NAMES: [&str; 3] = ["a.txt", "b.txt", "notes.md"];

/// Side a mutation sequence is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The local tree, reported through the watcher.
    Local,
    /// The remote repository, reported through its change log.
    Remote,
}

/// One edit of the tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Replace the content, recreating the file if it was deleted.
    Write(Vec<u8>),
    /// Rename within the current folder.
    Rename(&'static str),
    /// Move into a layout folder, or to the root with `None`.
    Move(Option<&'static str>),
    /// Delete the file.
    Delete,
}

/// Where the tracked file currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// Folder, `None` for the root.
    pub folder: Option<&'static str>,
    /// File name.
    pub name: &'static str,
    /// Whether the file exists.
    pub exists: bool,
}

impl TrackedFile {
    /// The file seeded by [`seed_layout`].
    pub fn seeded() -> Self {
        Self {
            folder: None,
            name: FILE_NAMES[0],
            exists: true,
        }
    }

    /// Relative path with `/` separators.
    pub fn relative(&self) -> String {
        relative(self.folder, self.name)
    }
}

fn relative(folder: Option<&str>, name: &str) -> String {
    match folder {
        Some(folder) => format!("{folder}/{name}"),
        None => name.to_string(),
    }
}

/// Creates the layout folders and the tracked file on the remote side.
pub fn seed_layout(repo: &TestRepository, content: &[u8]) {
    for folder in LAYOUT_FOLDERS {
        repo.remote
            .mkdir(&format!("/{folder}"))
            .expect("Failed to seed folder");
    }
    repo.remote
        .put_file(&format!("/{}", TrackedFile::seeded().relative()), content)
        .expect("Failed to seed file");
}

/// Applies `mutation` to one side, updating `file`. Returns false if the
/// mutation did not apply (object missing, or already in place).
pub fn apply_mutation(
    repo: &TestRepository,
    side: Side,
    file: &mut TrackedFile,
    mutation: &Mutation,
) -> bool {
    let current = file.relative();
    match mutation {
        Mutation::Write(content) => {
            match side {
                Side::Local => repo.write_local(&current, content),
                Side::Remote => {
                    repo.remote
                        .put_file(&format!("/{current}"), content)
                        .expect("Failed to write remote file");
                }
            }
            file.exists = true;
            true
        }
        Mutation::Rename(name) => {
            if !file.exists || *name == file.name {
                return false;
            }
            match side {
                Side::Local => repo.rename_local(&current, &relative(file.folder, name)),
                Side::Remote => repo
                    .remote
                    .rename(&format!("/{current}"), name)
                    .expect("Failed to rename remote file"),
            }
            file.name = name;
            true
        }
        Mutation::Move(folder) => {
            if !file.exists || *folder == file.folder {
                return false;
            }
            match side {
                Side::Local => repo.rename_local(&current, &relative(*folder, file.name)),
                Side::Remote => repo
                    .remote
                    .move_to(
                        &format!("/{current}"),
                        &format!("/{}", folder.unwrap_or_default()),
                    )
                    .expect("Failed to move remote file"),
            }
            file.folder = *folder;
            true
        }
        Mutation::Delete => {
            if !file.exists {
                return false;
            }
            match side {
                Side::Local => repo.remove_local(&current),
                Side::Remote => repo
                    .remote
                    .remove(&format!("/{current}"))
                    .expect("Failed to delete remote file"),
            }
            file.exists = false;
            true
        }
    }
}

/// Strategy for file content.
pub fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for a single mutation.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        3 => content_strategy().prop_map(Mutation::Write),
        2 => prop::sample::select(FILE_NAMES.to_vec()).prop_map(Mutation::Rename),
        2 => prop::option::of(prop::sample::select(LAYOUT_FOLDERS.to_vec()))
            .prop_map(Mutation::Move),
        1 => Just(Mutation::Delete),
    ]
}

/// Strategy for a mutation sequence.
pub fn mutation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(), min_ops..max_ops)
}

/// Strategy for the side a sequence is applied to.
pub fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Local), Just(Side::Remote)]
}

/// Strategy for change-log entries over a few objects, so that the same
/// object shows up repeatedly.
pub fn change_log_strategy(max_entries: usize) -> impl Strategy<Value = Vec<ChangeLogEntry>> {
    prop::collection::vec(
        (
            0u8..6,
            prop_oneof![
                Just(RemoteChangeKind::Created),
                Just(RemoteChangeKind::Updated),
                Just(RemoteChangeKind::Deleted),
            ],
        )
            .prop_map(|(id, kind)| ChangeLogEntry::new(format!("obj-{id}"), kind)),
        0..max_entries,
    )
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 256,
        }
    }
}

impl PropTestConfig {
    /// Configuration for end-to-end tests touching the filesystem.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 24,
            max_shrink_iters: 64,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
