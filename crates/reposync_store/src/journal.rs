//! Journal framing for the file store.
//!
//! Each entry is written as one frame:
//!
//! ```text
//! | magic (4) | version (1) | kind (1) | len (4, LE) | crc32 (4, LE) | CBOR payload (len) |
//! ```
//!
//! The CRC covers the kind byte and the payload. Replay stops at the first
//! frame that is truncated or fails its checksum; everything after that
//! point is a torn tail from an interrupted append.

use crate::error::{StoreError, StoreResult};
use crate::record::IdentityRecord;
use reposync_events::RemoteId;
use std::collections::BTreeMap;

/// Magic bytes identifying a journal frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"RSJ1";

/// Current frame format version.
pub const JOURNAL_VERSION: u8 = 1;

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 4 + 1 + 1 + 4 + 4;

const KIND_PUT: u8 = 1;
const KIND_DELETE: u8 = 2;
const KIND_TOKEN: u8 = 3;

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// Insert or replace a record.
    Put(IdentityRecord),
    /// Remove a record.
    Delete(RemoteId),
    /// Set or clear the change-log token.
    Token(Option<String>),
}

impl JournalEntry {
    fn kind_byte(&self) -> u8 {
        match self {
            JournalEntry::Put(_) => KIND_PUT,
            JournalEntry::Delete(_) => KIND_DELETE,
            JournalEntry::Token(_) => KIND_TOKEN,
        }
    }
}

/// Result of scanning a journal buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JournalScan {
    /// Entries decoded from intact frames, in order.
    pub entries: Vec<JournalEntry>,
    /// Length of the intact prefix in bytes.
    pub valid_len: u64,
    /// Number of trailing bytes that did not form a valid frame.
    pub torn_bytes: u64,
}

impl JournalScan {
    /// Returns true if the buffer ended with an incomplete or corrupt frame.
    pub fn has_torn_tail(&self) -> bool {
        self.torn_bytes > 0
    }
}

/// Encodes an entry into a complete frame.
///
/// # Errors
///
/// Returns [`StoreError::Codec`] if the payload cannot be serialized.
pub fn encode_entry(entry: &JournalEntry) -> StoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    let encoded = match entry {
        JournalEntry::Put(record) => ciborium::ser::into_writer(record, &mut payload),
        JournalEntry::Delete(remote_id) => ciborium::ser::into_writer(remote_id, &mut payload),
        JournalEntry::Token(token) => ciborium::ser::into_writer(token, &mut payload),
    };
    encoded.map_err(|e| StoreError::Codec(format!("{e:?}")))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::Codec(format!("payload too large: {} bytes", payload.len())))?;
    let kind = entry.kind_byte();
    let crc = frame_crc(kind, &payload);

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&JOURNAL_MAGIC);
    frame.push(JOURNAL_VERSION);
    frame.push(kind);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes every intact frame in `data`.
///
/// A frame whose checksum matches but whose payload cannot be decoded is
/// not a torn write: it is reported as [`StoreError::Corrupted`].
///
/// # Errors
///
/// Returns an error if an intact frame carries an unknown kind or an
/// undecodable payload.
pub fn decode_journal(data: &[u8]) -> StoreResult<JournalScan> {
    let mut scan = JournalScan::default();
    let mut offset = 0usize;

    while offset < data.len() {
        let Some((entry, frame_len)) = decode_frame(&data[offset..], offset)? else {
            break;
        };
        scan.entries.push(entry);
        offset += frame_len;
    }

    scan.valid_len = offset as u64;
    scan.torn_bytes = (data.len() - offset) as u64;
    Ok(scan)
}

/// Folds entries into the live records (ordered by remote id) and token.
pub fn replay_entries(entries: Vec<JournalEntry>) -> (Vec<IdentityRecord>, Option<String>) {
    let mut records: BTreeMap<RemoteId, IdentityRecord> = BTreeMap::new();
    let mut token = None;
    for entry in entries {
        match entry {
            JournalEntry::Put(record) => {
                records.insert(record.remote_id.clone(), record);
            }
            JournalEntry::Delete(remote_id) => {
                records.remove(&remote_id);
            }
            JournalEntry::Token(value) => token = value,
        }
    }
    (records.into_values().collect(), token)
}

fn decode_frame(data: &[u8], offset: usize) -> StoreResult<Option<(JournalEntry, usize)>> {
    if data.len() < FRAME_HEADER_LEN || data[..4] != JOURNAL_MAGIC {
        return Ok(None);
    }
    let version = data[4];
    let kind = data[5];
    let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    let crc = u32::from_le_bytes([data[10], data[11], data[12], data[13]]);

    let Some(payload) = data.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + len) else {
        return Ok(None);
    };
    if frame_crc(kind, payload) != crc {
        return Ok(None);
    }

    let corrupted = |what: String| StoreError::Corrupted(format!("frame at offset {offset}: {what}"));
    if version != JOURNAL_VERSION {
        return Err(corrupted(format!("unsupported journal version {version}")));
    }
    let entry = match kind {
        KIND_PUT => JournalEntry::Put(
            ciborium::de::from_reader(payload).map_err(|e| corrupted(format!("{e:?}")))?,
        ),
        KIND_DELETE => JournalEntry::Delete(
            ciborium::de::from_reader(payload).map_err(|e| corrupted(format!("{e:?}")))?,
        ),
        KIND_TOKEN => JournalEntry::Token(
            ciborium::de::from_reader(payload).map_err(|e| corrupted(format!("{e:?}")))?,
        ),
        other => return Err(corrupted(format!("unknown entry kind {other}"))),
    };
    Ok(Some((entry, FRAME_HEADER_LEN + len)))
}

fn frame_crc(kind: u8, payload: &[u8]) -> u32 {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(kind);
    buf.extend_from_slice(payload);
    compute_crc32(&buf)
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
