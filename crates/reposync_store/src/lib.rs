//! # RepoSync Store
//!
//! The Identity Store: durable mapping between local paths, remote object
//! identifiers and stable local UUIDs.
//!
//! Identity records are the only durable state of the reconciliation
//! pipeline. Everything else (events, situations) is transient.
//!
//! ## Invariants
//!
//! - At most one record per remote identifier
//! - At most one record per local UUID
//! - At most one record per local path
//! - Records failing validation are treated as absent
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral sessions
//! - [`FileStore`] - CRC-framed CBOR journal that survives restarts
//!
//! ## Example
//!
//! ```rust
//! use reposync_events::RemoteId;
//! use reposync_store::{IdentityRecord, InMemoryStore, MetadataStore};
//!
//! let store = InMemoryStore::new();
//! store.save(IdentityRecord::folder("f-1", "Cat", "Cat")).unwrap();
//! assert!(store.get(&RemoteId::new("f-1")).unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod index;
mod journal;
mod memory;
mod record;
mod validate;

pub use backend::MetadataStore;
pub use error::{StoreError, StoreResult};
pub use file::{CompactionStats, FileStore, FileStoreOptions};
pub use journal::{
    compute_crc32, decode_journal, encode_entry, replay_entries, JournalEntry, JournalScan,
    JOURNAL_MAGIC, JOURNAL_VERSION,
};
pub use memory::InMemoryStore;
pub use record::IdentityRecord;
pub use validate::{validate_records, ValidationReport};
