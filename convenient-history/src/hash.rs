//! Content digests

use crate::error::{HistoryError, HistoryResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Content hash (SHA-256, lowercase hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Create from file content
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be read.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read(path)?;
        Ok(Self::from_bytes(&content))
    }

    /// Parse from a hex string
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::InvalidHash` unless the string is 64 lowercase hex digits.
    pub fn from_hex(hex: impl Into<String>) -> HistoryResult<Self> {
        let hex = hex.into();
        if hex.len() != 64 || !hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(HistoryError::InvalidHash(hex));
        }
        Ok(Self(hex))
    }

    /// Get hex string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex digits, for log lines
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = HistoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Incremental SHA-256 builder over length-prefixed fields.
///
/// Every field is written as its byte length followed by the bytes, so two
/// different field sequences can never concatenate to the same stream.
pub(crate) struct CanonicalHasher {
    inner: Sha256,
}

impl CanonicalHasher {
    pub(crate) fn new(domain: &str) -> Self {
        let mut hasher = Self { inner: Sha256::new() };
        hasher.put_str(domain);
        hasher
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        self.inner.update((bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
    }

    pub(crate) fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    pub(crate) fn put_hash(&mut self, hash: &ContentHash) {
        self.put_str(hash.as_str());
    }

    pub(crate) fn put_tag(&mut self, tag: u8) {
        self.inner.update([tag]);
    }

    pub(crate) fn finish(self) -> ContentHash {
        ContentHash(hex::encode(self.inner.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_is_stable() {
        let a = ContentHash::from_bytes(b"hello");
        let b = ContentHash::from_bytes(b"hello");
        assert_eq!(a, b);
        assert_eq!(
            a.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(a.short(), "2cf24dba");
    }

    #[test]
    fn test_from_hex_validation() {
        assert!(ContentHash::from_hex("deadbeef").is_err());
        assert!(ContentHash::from_hex("Z".repeat(64)).is_err());
        assert!(ContentHash::from_hex("A".repeat(64)).is_err());
        assert!(ContentHash::from_hex("a".repeat(64)).is_ok());
    }

    #[test]
    fn test_serde_rejects_invalid_hash() {
        let result: Result<ContentHash, _> = serde_json::from_str("\"not-a-hash\"");
        assert!(result.is_err());

        let hash = ContentHash::from_bytes(b"x");
        let json = serde_json::to_string(&hash).unwrap();
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }

    #[test]
    fn test_canonical_hasher_is_unambiguous() {
        let mut ab = CanonicalHasher::new("test");
        ab.put_str("ab");
        ab.put_str("c");

        let mut a_bc = CanonicalHasher::new("test");
        a_bc.put_str("a");
        a_bc.put_str("bc");

        assert_ne!(ab.finish(), a_bc.finish());
    }
}
