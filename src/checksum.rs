//! Digest utilities for content integrity verification

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;

/// Hash algorithm a declared digest was produced with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Current content hashes (`contentHash`)
    Sha256,
    /// Legacy gist digests carried in `hash`
    Sha1,
}

impl HashAlgorithm {
    /// Length of the lowercase hex digest
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha1 => 40,
        }
    }
}

/// Lowercase hex digest of module source bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Compute the SHA-256 checksum of raw bytes
    pub fn sha256(data: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(data)))
    }

    /// Compute the legacy SHA-1 checksum of raw bytes
    pub fn sha1(data: &[u8]) -> Self {
        Self(format!("{:x}", Sha1::digest(data)))
    }

    /// Compute a checksum with the given algorithm
    pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::sha256(data),
            HashAlgorithm::Sha1 => Self::sha1(data),
        }
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that `data` hashes to this checksum under `algorithm`
    pub fn verify(&self, algorithm: HashAlgorithm, data: &[u8]) -> bool {
        Self::compute(algorithm, data) == *self
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Checksum {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Checksum {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_value() {
        let checksum = Checksum::sha256(b"abc");
        assert_eq!(
            checksum.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(checksum.as_str().len(), HashAlgorithm::Sha256.hex_len());
    }

    #[test]
    fn test_sha1_known_value() {
        let checksum = Checksum::sha1(b"abc");
        assert_eq!(checksum.as_str(), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(checksum.as_str().len(), HashAlgorithm::Sha1.hex_len());
    }

    #[test]
    fn test_single_byte_flip_changes_checksum() {
        let content = b"---\nauthor: alice\n---\n@text greeting = \"hi\"\n".to_vec();
        let mut tampered = content.clone();
        tampered[5] ^= 0x01;

        let checksum = Checksum::sha256(&content);
        assert!(checksum.verify(HashAlgorithm::Sha256, &content));
        assert!(!checksum.verify(HashAlgorithm::Sha256, &tampered));
    }
}
