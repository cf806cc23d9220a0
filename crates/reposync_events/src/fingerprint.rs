//! Content fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// SHA-256 digest of file content, stored as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Length of the hex representation.
    pub const HEX_LEN: usize = 64;

    /// Fingerprints an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(to_hex(&digest))
    }

    /// Fingerprints everything readable from `reader`.
    pub fn of_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(Self(to_hex(&hasher.finalize())))
    }

    /// Fingerprints the content of a file on disk.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        Self::of_reader(File::open(path)?)
    }

    /// Parses a stored hex fingerprint, rejecting malformed values.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == Self::HEX_LEN
            && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    /// Returns true if the stored value is a well-formed digest.
    pub fn is_well_formed(&self) -> bool {
        Self::from_hex(&self.0).is_some()
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        let fp = Fingerprint::of_bytes(b"hello");
        assert_eq!(
            fp.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn reader_matches_bytes() {
        let data = vec![7u8; 200_000];
        let from_reader = Fingerprint::of_reader(&data[..]).unwrap();
        assert_eq!(from_reader, Fingerprint::of_bytes(&data));
    }

    #[test]
    fn from_hex_validates() {
        let fp = Fingerprint::of_bytes(b"abc");
        assert_eq!(Fingerprint::from_hex(fp.as_str()), Some(fp.clone()));
        assert!(fp.is_well_formed());
        assert!(Fingerprint::from_hex("xyz").is_none());
        assert!(Fingerprint::from_hex(&"A".repeat(64)).is_none());
    }
}
