//! Tree chunker — splits content into a Merkle tree of fixed-size chunks
//! and reads it back lazily.
//!
//! With `branches` children per node and 32-byte keys the chunk size is
//! `C = 32 * branches`. Content of size `S` becomes a tree of depth `d`,
//! the smallest depth with `C * branches^d >= S`:
//!
//!   leaf      covers up to C bytes and holds them verbatim
//!   interior  covers up to C * branches^k bytes and holds the keys of
//!             its children, each child covering 1/branches of the span
//!
//! Every chunk starts with the size of the content below it. A short final
//! section does not get empty intermediate levels: split keeps descending
//! while the section is smaller than one child's span, so the last child of
//! a node may be a shallower tree (or a plain leaf). Join applies the same
//! rule from the subtree size in each chunk's header.
//!
//! Both directions recurse once per tree level. Depth is bounded by the
//! number of times `C` can be multiplied by `branches` before overflowing a
//! u64 (at most 58 levels, reached with branches = 2), and each level is a
//! boxed future, so the recursion lives on the heap rather than the stack.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use swarm_core::config::ChunkerConfig;
use swarm_core::{Chunk, ChunkHasher, Key, KEY_SIZE};

use crate::error::{ChunkerError, StoreError};
use crate::reader::SectionReader;
use crate::store::ChunkStore;

pub const DEFAULT_BRANCHES: usize = 128;

#[async_trait]
pub trait Chunker: Send + Sync {
    /// Split `reader` into chunks, pushing each one to `sink` exactly once,
    /// children before their parent. Returns the root key.
    async fn split(
        &self,
        reader: &dyn SectionReader,
        sink: &dyn ChunkStore,
    ) -> Result<Key, ChunkerError>;

    /// Open the tree rooted at `key` for reading. Only the root chunk is
    /// fetched up front.
    async fn join(
        &self,
        store: Arc<dyn ChunkStore>,
        key: &Key,
    ) -> Result<Box<dyn SectionReader>, ChunkerError>;

    /// Width of the keys this chunker produces.
    fn key_size(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeChunker {
    branches: u64,
    hasher: ChunkHasher,
    chunk_size: u64,
}

impl Default for TreeChunker {
    fn default() -> Self {
        Self::new(DEFAULT_BRANCHES, ChunkHasher::default())
    }
}

impl TreeChunker {
    /// # Panics
    /// If `branches < 2`; a tree with one child per node never gets wider.
    pub fn new(branches: usize, hasher: ChunkHasher) -> Self {
        assert!(branches >= 2, "tree chunker needs at least 2 branches");
        let branches = branches as u64;
        Self {
            branches,
            hasher,
            chunk_size: branches * hasher.size() as u64,
        }
    }

    pub fn from_config(config: &ChunkerConfig) -> Self {
        Self::new(config.branches, config.hasher)
    }

    pub fn branches(&self) -> usize {
        self.branches as usize
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn hasher(&self) -> ChunkHasher {
        self.hasher
    }

    /// Depth and span of the smallest tree holding `size` bytes.
    fn tree_size(&self, size: u64) -> Result<(u32, u64), ChunkerError> {
        let mut depth = 0;
        let mut width = self.chunk_size;
        while width < size {
            width = width
                .checked_mul(self.branches)
                .ok_or(ChunkerError::OversizedInput(size))?;
            depth += 1;
        }
        Ok((depth, width))
    }

    /// Split `[offset, offset + size)` of `reader`. `child_width` is the span
    /// of one child at `depth`.
    fn split_section<'a>(
        &'a self,
        reader: &'a dyn SectionReader,
        sink: &'a dyn ChunkStore,
        mut depth: u32,
        mut child_width: u64,
        offset: u64,
        size: u64,
    ) -> BoxFuture<'a, Result<Key, ChunkerError>> {
        async move {
            while depth > 0 && size < child_width {
                child_width /= self.branches;
                depth -= 1;
            }

            let chunk = if depth == 0 {
                // size < C here, so it fits in memory
                let mut buf = vec![0u8; size as usize];
                read_exact_at(reader, &mut buf, offset).await?;
                Chunk::tree(self.hasher, size, &buf)
            } else {
                let branch_count = size.div_ceil(child_width);
                let mut keys = vec![0u8; self.branches as usize * KEY_SIZE];
                let mut pos = 0;
                for i in 0..branch_count as usize {
                    // the last section may be shorter
                    let section = child_width.min(size - pos);
                    let key = self
                        .split_section(
                            reader,
                            sink,
                            depth - 1,
                            child_width / self.branches,
                            offset + pos,
                            section,
                        )
                        .await?;
                    keys[i * KEY_SIZE..(i + 1) * KEY_SIZE].copy_from_slice(key.as_bytes());
                    pos += child_width;
                }
                Chunk::tree(self.hasher, size, &keys)
            };

            let key = *chunk.key();
            tracing::trace!(key = %key, depth, size, "chunk emitted");
            sink.put(chunk).await?;
            Ok(key)
        }
        .boxed()
    }

    /// Open the tree rooted at `key`.
    pub async fn open(
        &self,
        store: Arc<dyn ChunkStore>,
        key: &Key,
    ) -> Result<LazyChunkReader, ChunkerError> {
        let root = fetch(store.as_ref(), key).await?;
        let size = root
            .subtree_size()
            .ok_or_else(|| ChunkerError::malformed(key, "root chunk has no size header"))?;
        let (_, width) = self
            .tree_size(size)
            .map_err(|_| ChunkerError::malformed(key, format!("root claims {size} bytes")))?;
        tracing::debug!(key = %key, size, "joined tree");
        Ok(LazyChunkReader {
            chunker: *self,
            store,
            root,
            size,
            width,
        })
    }
}

#[async_trait]
impl Chunker for TreeChunker {
    async fn split(
        &self,
        reader: &dyn SectionReader,
        sink: &dyn ChunkStore,
    ) -> Result<Key, ChunkerError> {
        let size = reader.size();
        let (depth, width) = self.tree_size(size)?;
        let key = self
            .split_section(reader, sink, depth, width / self.branches, 0, size)
            .await?;
        tracing::debug!(key = %key, size, depth, "split complete");
        Ok(key)
    }

    async fn join(
        &self,
        store: Arc<dyn ChunkStore>,
        key: &Key,
    ) -> Result<Box<dyn SectionReader>, ChunkerError> {
        Ok(Box::new(self.open(store, key).await?))
    }

    fn key_size(&self) -> usize {
        self.hasher.size()
    }
}

async fn read_exact_at(
    reader: &dyn SectionReader,
    buf: &mut [u8],
    offset: u64,
) -> Result<(), ChunkerError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read_at(&mut buf[filled..], offset + filled as u64).await?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }
    Ok(())
}

async fn fetch(store: &dyn ChunkStore, key: &Key) -> Result<Chunk, ChunkerError> {
    store
        .get(key)
        .await?
        .ok_or_else(|| StoreError::NotFound(*key).into())
}

/// Reader over a joined tree. Each read walks down from the root and
/// fetches only the chunks covering the requested range.
pub struct LazyChunkReader {
    chunker: TreeChunker,
    store: Arc<dyn ChunkStore>,
    root: Chunk,
    size: u64,
    width: u64,
}

impl LazyChunkReader {
    pub fn root_key(&self) -> &Key {
        self.root.key()
    }

    /// Copy the part of `chunk` that falls in `[read_start, read_end)` into
    /// `dest`, which holds exactly that global range. `expected` is the
    /// subtree size the parent implies for this chunk.
    #[allow(clippy::too_many_arguments)]
    fn read_node<'a>(
        &'a self,
        chunk: Chunk,
        mut width: u64,
        chunk_start: u64,
        read_start: u64,
        read_end: u64,
        dest: &'a mut [u8],
        expected: Option<u64>,
    ) -> BoxFuture<'a, Result<(), ChunkerError>> {
        async move {
            let key = *chunk.key();
            let branches = self.chunker.branches;
            let size = chunk
                .subtree_size()
                .ok_or_else(|| ChunkerError::malformed(&key, "chunk has no size header"))?;
            if let Some(expected) = expected {
                if size != expected {
                    return Err(ChunkerError::malformed(
                        &key,
                        format!("subtree size {size}, parent implies {expected}"),
                    ));
                }
            }

            // same level skipping as split
            while width > self.chunker.chunk_size && size < width / branches {
                width /= branches;
            }

            let node_start = read_start.saturating_sub(chunk_start);
            let node_end = size.min(read_end - chunk_start);
            if node_start >= node_end {
                return Ok(());
            }
            let payload = chunk.payload();

            if width <= self.chunker.chunk_size {
                if payload.len() as u64 != size {
                    return Err(ChunkerError::malformed(
                        &key,
                        format!("leaf holds {} bytes, header says {size}", payload.len()),
                    ));
                }
                let src = &payload[node_start as usize..node_end as usize];
                let at = (chunk_start + node_start - read_start) as usize;
                dest[at..at + src.len()].copy_from_slice(src);
                return Ok(());
            }

            let child_width = width / branches;
            let needed = size.div_ceil(child_width);
            if (payload.len() as u64) < needed * KEY_SIZE as u64 {
                return Err(ChunkerError::malformed(
                    &key,
                    format!("{needed} child keys needed, payload holds {} bytes", payload.len()),
                ));
            }

            let first = node_start / child_width;
            let last = (node_end - 1) / child_width;
            for i in first..=last {
                let at = i as usize * KEY_SIZE;
                let child_key = Key::from_slice(&payload[at..at + KEY_SIZE])
                    .map_err(|e| ChunkerError::malformed(&key, e.to_string()))?;
                let child = fetch(self.store.as_ref(), &child_key).await?;
                let child_expected = child_width.min(size - i * child_width);
                self.read_node(
                    child,
                    child_width,
                    chunk_start + i * child_width,
                    read_start,
                    read_end,
                    &mut *dest,
                    Some(child_expected),
                )
                .await?;
            }
            Ok(())
        }
        .boxed()
    }
}

#[async_trait]
impl SectionReader for LazyChunkReader {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, ChunkerError> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let len = (buf.len() as u64).min(self.size - offset);
        let end = offset + len;
        self.read_node(
            self.root.clone(),
            self.width,
            0,
            offset,
            end,
            &mut buf[..len as usize],
            None,
        )
        .await?;
        Ok(len as usize)
    }
}
