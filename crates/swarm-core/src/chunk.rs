//! Chunks — the atomic unit of storage.
//!
//! A chunk is a key plus the bytes the key was derived from. Chunks produced
//! by the tree chunker carry an 8-byte little-endian subtree size in front
//! of their payload:
//!
//!   leaf:     size || content bytes
//!   interior: size || key_0 || key_1 || ... || key_{branches-1}
//!
//! The key of either kind is `hash(size || payload)`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::key::{ChunkHasher, Key};

/// Length of the subtree-size header on tree chunks.
pub const TREE_HEADER_SIZE: usize = 8;

/// An immutable key/data pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    key: Key,
    data: Bytes,
}

impl Chunk {
    /// Create a chunk, deriving its key from the data.
    pub fn new(hasher: ChunkHasher, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let key = hasher.hash(&data);
        Self { key, data }
    }

    /// Reassemble a chunk from a key and data received elsewhere.
    ///
    /// The key is taken as given. Use [`Chunk::verify`] when the source is
    /// not trusted.
    pub fn from_parts(key: Key, data: impl Into<Bytes>) -> Self {
        Self {
            key,
            data: data.into(),
        }
    }

    /// Build a tree chunk: size header followed by `payload`.
    pub fn tree(hasher: ChunkHasher, subtree_size: u64, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(TREE_HEADER_SIZE + payload.len());
        buf.put_u64_le(subtree_size);
        buf.put_slice(payload);
        Self::new(hasher, buf.freeze())
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// True if the data hashes to the key under `hasher`.
    pub fn verify(&self, hasher: ChunkHasher) -> bool {
        hasher.hash(&self.data) == self.key
    }

    /// Subtree size from the tree header, or None if the data is too short
    /// to carry one.
    pub fn subtree_size(&self) -> Option<u64> {
        let header: [u8; TREE_HEADER_SIZE] = self.data.get(..TREE_HEADER_SIZE)?.try_into().ok()?;
        Some(u64::from_le_bytes(header))
    }

    /// Bytes after the tree header. Empty if there is no header.
    pub fn payload(&self) -> Bytes {
        if self.data.len() < TREE_HEADER_SIZE {
            return Bytes::new();
        }
        self.data.slice(TREE_HEADER_SIZE..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_derives_key_from_data() {
        let chunk = Chunk::new(ChunkHasher::Blake3, Bytes::from_static(b"hello"));
        assert_eq!(*chunk.key(), ChunkHasher::Blake3.hash(b"hello"));
        assert!(chunk.verify(ChunkHasher::Blake3));
    }

    #[test]
    fn tree_chunk_header_is_little_endian() {
        let chunk = Chunk::tree(ChunkHasher::Blake3, 5000, b"abc");
        assert_eq!(&chunk.data()[..8], &5000u64.to_le_bytes());
        assert_eq!(chunk.subtree_size(), Some(5000));
        assert_eq!(&chunk.payload()[..], b"abc");
        // the key covers the header too
        assert_eq!(*chunk.key(), ChunkHasher::Blake3.hash(chunk.data()));
    }

    #[test]
    fn from_parts_trusts_the_key() {
        let key = Key::new([7u8; 32]);
        let chunk = Chunk::from_parts(key, Bytes::from_static(b"not matching"));
        assert_eq!(*chunk.key(), key);
        assert!(!chunk.verify(ChunkHasher::Blake3));
    }

    #[test]
    fn short_data_has_no_header() {
        let chunk = Chunk::from_parts(Key::zero(), Bytes::from_static(b"abc"));
        assert_eq!(chunk.subtree_size(), None);
        assert!(chunk.payload().is_empty());
    }
}
