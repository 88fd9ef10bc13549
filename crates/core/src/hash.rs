//! Content hashing using SHA-1
//!
//! The `.dirindex` manifest format identifies files and directory
//! manifests by lowercase hex SHA-1, so SHA-1 is the hash the whole
//! engine speaks.

use std::fmt;
use std::io::Read;
use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::eyre;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Read buffer for hashing files from disk (1 MiB)
const HASH_BUF_LEN: usize = 1024 * 1024;

/// A SHA-1 content hash (160-bit)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 20]);

impl ContentHash {
    /// Hash arbitrary bytes
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut ctx = HashContext::new();
        ctx.update(data);
        ctx.finish()
    }

    /// Hash a file by path, streaming in 1 MiB chunks
    ///
    /// # Errors
    /// Returns an error if the file cannot be read
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut ctx = HashContext::new();
        let mut buf = vec![0u8; HASH_BUF_LEN];

        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            ctx.update(&buf[..n]);
        }

        Ok(ctx.finish())
    }

    /// Parse a 40-character hex digest (case-insensitive)
    ///
    /// # Errors
    /// Returns an error if the input is not valid hex or has the wrong
    /// length
    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s)?;
        let bytes: [u8; 20] = raw
            .as_slice()
            .try_into()
            .map_err(|_| eyre!("digest is {} bytes, expected 20", raw.len()))?;
        Ok(Self(bytes))
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert to lowercase hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "ContentHash({})", hex.get(..16).unwrap_or(&hex))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}", hex.get(..16).unwrap_or(&hex))
    }
}

/// Streaming SHA-1 context for request bodies.
///
/// Bodies are hashed incrementally as chunks arrive; they are never
/// buffered just to be hashed.
pub struct HashContext {
    inner: Sha1,
}

impl HashContext {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Sha1::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    #[must_use]
    pub fn finish(self) -> ContentHash {
        ContentHash(self.inner.finalize().into())
    }
}

impl Default for HashContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_vector() {
        assert_eq!(
            ContentHash::from_bytes(b"").to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(
            ContentHash::from_bytes(b"hello world").to_hex(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut ctx = HashContext::new();
        ctx.update(b"hello ");
        ctx.update(b"world");
        assert_eq!(ctx.finish(), ContentHash::from_bytes(b"hello world"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let hash = ContentHash::from_file(&path).unwrap();
        assert_eq!(hash, ContentHash::from_bytes(b"hello world"));
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = ContentHash::from_bytes(b"roundtrip");
        let parsed = ContentHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn test_from_hex_accepts_uppercase() {
        let hash = ContentHash::from_bytes(b"case");
        let parsed = ContentHash::from_hex(&hash.to_hex().to_uppercase()).unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(ContentHash::from_hex("not hex").is_err());
        assert!(ContentHash::from_hex("abcd").is_err());
    }
}
