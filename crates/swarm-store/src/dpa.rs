//! Distributed preimage archive: a chunker bound to a chunk store.

use std::sync::Arc;

use swarm_core::Key;

use crate::chunker::Chunker;
use crate::error::ChunkerError;
use crate::reader::SectionReader;
use crate::store::ChunkStore;

#[derive(Clone)]
pub struct Dpa {
    chunker: Arc<dyn Chunker>,
    store: Arc<dyn ChunkStore>,
}

impl Dpa {
    pub fn new(chunker: Arc<dyn Chunker>, store: Arc<dyn ChunkStore>) -> Self {
        Self { chunker, store }
    }

    /// Split `reader` into the store and return the root key.
    pub async fn store(&self, reader: &dyn SectionReader) -> Result<Key, ChunkerError> {
        self.chunker.split(reader, self.store.as_ref()).await
    }

    /// Open the content under `key` for lazy reading.
    pub async fn retrieve(&self, key: &Key) -> Result<Box<dyn SectionReader>, ChunkerError> {
        self.chunker.join(self.store.clone(), key).await
    }

    pub fn chunk_store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::TreeChunker;
    use crate::mem_store::MemStore;
    use crate::reader::ArrayReader;
    use swarm_core::ChunkHasher;

    fn dpa() -> (Dpa, MemStore) {
        let mem = MemStore::with_capacity(1024);
        let dpa = Dpa::new(
            Arc::new(TreeChunker::new(8, ChunkHasher::Blake3)),
            Arc::new(mem.clone()),
        );
        (dpa, mem)
    }

    #[tokio::test]
    async fn store_then_retrieve() {
        let (dpa, mem) = dpa();
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 7) as u8).collect();
        let key = dpa.store(&ArrayReader::new(data.clone())).await.unwrap();
        assert!(!mem.is_empty());

        let reader = dpa.retrieve(&key).await.unwrap();
        assert_eq!(reader.size(), 3000);
        assert_eq!(reader.read_all().await.unwrap(), data);
    }

    #[tokio::test]
    async fn empty_content_is_one_chunk() {
        let (dpa, mem) = dpa();
        let key = dpa.store(&ArrayReader::new(Vec::new())).await.unwrap();
        assert_eq!(mem.len(), 1);
        let reader = dpa.retrieve(&key).await.unwrap();
        assert_eq!(reader.size(), 0);
        assert!(reader.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_key_fails() {
        let (dpa, _) = dpa();
        assert!(dpa.retrieve(&Key::new([1; 32])).await.is_err());
    }
}
