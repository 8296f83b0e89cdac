// src/hash.rs

//! Hashing helpers for content addressing and recipe checksums
//!
//! Concrete specs are identified by a SHA-256 digest over a canonical text
//! rendering of their fields. Recipe checksums are only validated for shape
//! here; downloading and verifying sources happens elsewhere.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hash characters shown in prefixes and short listings
pub const SHORT_HASH_LEN: usize = 10;

/// Checksum algorithm, inferred from the digest length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumKind {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumKind {
    /// Identify a hex checksum by its length
    pub fn from_hex(value: &str) -> Result<Self> {
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::ParseError(format!("invalid hex in checksum '{}'", value)));
        }
        match value.len() {
            32 => Ok(Self::Md5),
            40 => Ok(Self::Sha1),
            64 => Ok(Self::Sha256),
            128 => Ok(Self::Sha512),
            n => Err(Error::ParseError(format!(
                "checksum '{}' has unsupported length {}",
                value, n
            ))),
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Incremental hasher over `key=value` lines
///
/// Each field is written as one line so that adjacent fields can never run
/// together into the same byte stream.
pub struct Hasher {
    state: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            state: Sha256::new(),
        }
    }

    /// Add a `key=value` line
    pub fn field(&mut self, key: &str, value: impl fmt::Display) {
        self.state.update(format!("{}={}\n", key, value).as_bytes());
    }

    /// Finalize into a lowercase hex digest
    pub fn finalize(self) -> String {
        hex::encode(self.state.finalize())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Leading characters of a hash, for prefixes and listings
#[inline]
pub fn short(hash: &str) -> &str {
    hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hasher_matches_one_shot() {
        let mut hasher = Hasher::new();
        hasher.field("name", "zlib");
        hasher.field("version", "1.3");
        assert_eq!(
            hasher.finalize(),
            hex::encode(Sha256::digest(b"name=zlib\nversion=1.3\n"))
        );
    }

    #[test]
    fn test_field_boundaries_matter() {
        let mut a = Hasher::new();
        a.field("a", "bc");
        let mut b = Hasher::new();
        b.field("ab", "c");
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_checksum_kind() {
        assert_eq!(
            ChecksumKind::from_hex("d41d8cd98f00b204e9800998ecf8427e").unwrap(),
            ChecksumKind::Md5
        );
        assert_eq!(ChecksumKind::from_hex(&"a".repeat(64)).unwrap(), ChecksumKind::Sha256);
        assert!(ChecksumKind::from_hex("xyz").is_err());
        assert!(ChecksumKind::from_hex("abcd").is_err());
    }

    #[test]
    fn test_short() {
        assert_eq!(short("0123456789abcdef"), "0123456789");
        assert_eq!(short("abc"), "abc");
    }
}
