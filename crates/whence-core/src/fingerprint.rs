//! Content fingerprints for in-memory sources.
//!
//! Sources that never touched disk (generated code, notebook cells, `exec`
//! strings) are keyed by a digest of their text, so two different in-memory
//! units registered under the same display name never share a cache slot.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 of some content, stored as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Number of hex characters used by [`short`](Self::short).
    pub const SHORT_LEN: usize = 12;

    /// Compute the SHA-256 hash of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        ContentHash(hex::encode(result))
    }

    /// Leading 12 hex characters, for embedding into readable keys.
    pub fn short(&self) -> &str {
        &self.0[..Self::SHORT_LEN.min(self.0.len())]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        let hash = ContentHash::compute(b"");
        assert_eq!(
            hash.0,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash.short(), "e3b0c44298fc");
    }

    #[test]
    fn different_content_different_hash() {
        assert_ne!(
            ContentHash::compute(b"x = 1\n"),
            ContentHash::compute(b"x = 2\n")
        );
    }

    #[test]
    fn serializes_as_plain_string() {
        let hash = ContentHash::compute(b"abc");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.0));
    }
}
