//! Store traits.
//!
//! [`ChunkStore`] is what the chunker and the DPA talk to. It is async
//! because one implementation ([`crate::NetStore`]) may have to wait on the
//! network. [`PersistentStore`] is the synchronous key → bytes collaborator
//! behind the slow tier of [`crate::LocalStore`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use swarm_core::{Chunk, Key};

use crate::error::StoreError;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Store a chunk. Storing the same chunk twice has no further effect.
    async fn put(&self, chunk: Chunk) -> Result<(), StoreError>;

    /// Look a chunk up. `Ok(None)` means the store does not have it; a
    /// network-backed store instead fails with [`StoreError::NotFound`]
    /// once its search gives up.
    async fn get(&self, key: &Key) -> Result<Option<Chunk>, StoreError>;
}

#[async_trait]
impl<S: ChunkStore + ?Sized> ChunkStore for Arc<S> {
    async fn put(&self, chunk: Chunk) -> Result<(), StoreError> {
        (**self).put(chunk).await
    }

    async fn get(&self, key: &Key) -> Result<Option<Chunk>, StoreError> {
        (**self).get(key).await
    }
}

/// Durable key → bytes storage.
pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &Key) -> Result<Option<Bytes>, StoreError>;

    fn put(&self, key: &Key, data: &[u8]) -> Result<(), StoreError>;
}
