//! Content keys and the digests that produce them.
//!
//! Every chunk in the store is addressed by a 32-byte digest of its data.
//! Two digests are supported:
//!   1. BLAKE3 — the default, fast on every platform
//!   2. SHA-256 — the key derivation used by the bzz network
//!
//! Both produce [`KEY_SIZE`] bytes, so the tree layout does not depend on
//! which one a chunker was configured with.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Width of every key in bytes.
pub const KEY_SIZE: usize = 32;

// ── Key ───────────────────────────────────────────────────────────────────────

/// Opaque content identifier. Equality and hashing are byte-for-byte.
///
/// The all-zero key is reserved: in a retrieve request it means "tell me
/// about peers near my own address" rather than a content lookup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    pub const fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// The reserved all-zero key.
    pub const fn zero() -> Self {
        Self([0u8; KEY_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Build a key from a slice that must be exactly [`KEY_SIZE`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| KeyError::BadLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(KeyError::BadHex)?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// XOR distance between two keys, compared lexicographically.
    ///
    /// Used by the hive to rank peers by closeness to a content key.
    pub fn distance(&self, other: &Key) -> [u8; KEY_SIZE] {
        let mut out = [0u8; KEY_SIZE];
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.0[i] ^ other.0[i];
        }
        out
    }
}

impl From<[u8; KEY_SIZE]> for Key {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", &self.to_hex()[..16])
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key must be {KEY_SIZE} bytes, got {0}")]
    BadLength(usize),

    #[error("invalid hex key: {0}")]
    BadHex(hex::FromHexError),
}

// ── Hashing ───────────────────────────────────────────────────────────────────

/// Digest used to derive chunk keys. Fixed per chunker instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkHasher {
    #[default]
    Blake3,
    Sha256,
}

impl ChunkHasher {
    /// Hash a byte slice into a key.
    pub fn hash(&self, data: &[u8]) -> Key {
        match self {
            ChunkHasher::Blake3 => Key(*blake3::hash(data).as_bytes()),
            ChunkHasher::Sha256 => {
                let mut out = [0u8; KEY_SIZE];
                out.copy_from_slice(&Sha256::digest(data));
                Key(out)
            }
        }
    }

    /// Digest width in bytes.
    pub const fn size(&self) -> usize {
        KEY_SIZE
    }
}

impl std::str::FromStr for ChunkHasher {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(ChunkHasher::Blake3),
            "sha256" | "sha-256" => Ok(ChunkHasher::Sha256),
            other => Err(format!("unknown hasher: {other}")),
        }
    }
}
