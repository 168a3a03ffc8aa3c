//! Bounded in-memory chunk cache, least recently used chunks evicted first.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use swarm_core::{Chunk, Key};

use crate::error::StoreError;
use crate::store::{ChunkStore, PersistentStore};

#[derive(Clone)]
pub struct MemStore {
    cache: Arc<Mutex<LruCache<Key, Chunk>>>,
}

impl MemStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Capacity from config, treating 0 as 1.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn put(&self, chunk: Chunk) {
        tracing::trace!(key = %chunk.key(), "mem store put");
        self.cache.lock().put(*chunk.key(), chunk);
    }

    pub fn get(&self, key: &Key) -> Option<Chunk> {
        self.cache.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.cache.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

#[async_trait]
impl ChunkStore for MemStore {
    async fn put(&self, chunk: Chunk) -> Result<(), StoreError> {
        MemStore::put(self, chunk);
        Ok(())
    }

    async fn get(&self, key: &Key) -> Result<Option<Chunk>, StoreError> {
        Ok(MemStore::get(self, key))
    }
}

impl PersistentStore for MemStore {
    fn get(&self, key: &Key) -> Result<Option<Bytes>, StoreError> {
        Ok(self.cache.lock().get(key).map(|c| c.data().clone()))
    }

    fn put(&self, key: &Key, data: &[u8]) -> Result<(), StoreError> {
        let chunk = Chunk::from_parts(*key, Bytes::copy_from_slice(data));
        self.cache.lock().put(*key, chunk);
        Ok(())
    }
}
