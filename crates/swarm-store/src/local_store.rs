//! Tiered local storage: a memory tier in front of a persistent tier.

use std::sync::Arc;

use async_trait::async_trait;
use swarm_core::{Chunk, Key};

use crate::error::StoreError;
use crate::mem_store::MemStore;
use crate::store::{ChunkStore, PersistentStore};

#[derive(Clone)]
pub struct LocalStore {
    mem: MemStore,
    db: Arc<dyn PersistentStore>,
}

impl LocalStore {
    pub fn new(mem: MemStore, db: Arc<dyn PersistentStore>) -> Self {
        Self { mem, db }
    }

    /// Write to the memory tier, then the persistent tier. Returns only
    /// once the persistent write has finished.
    pub fn put(&self, chunk: &Chunk) -> Result<(), StoreError> {
        self.mem.put(chunk.clone());
        self.db.put(chunk.key(), chunk.data())
    }

    /// Memory tier first, then the persistent tier. A persistent hit is
    /// promoted into the memory tier.
    pub fn get(&self, key: &Key) -> Result<Option<Chunk>, StoreError> {
        if let Some(chunk) = self.mem.get(key) {
            return Ok(Some(chunk));
        }
        let Some(data) = self.db.get(key)? else {
            return Ok(None);
        };
        let chunk = Chunk::from_parts(*key, data);
        self.mem.put(chunk.clone());
        tracing::trace!(key = %key, "promoted chunk from persistent tier");
        Ok(Some(chunk))
    }

    pub fn mem(&self) -> &MemStore {
        &self.mem
    }
}

#[async_trait]
impl ChunkStore for LocalStore {
    async fn put(&self, chunk: Chunk) -> Result<(), StoreError> {
        LocalStore::put(self, &chunk)
    }

    async fn get(&self, key: &Key) -> Result<Option<Chunk>, StoreError> {
        LocalStore::get(self, key)
    }
}
