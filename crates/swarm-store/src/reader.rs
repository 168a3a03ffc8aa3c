//! Random-access byte sources.
//!
//! The chunker splits anything that implements [`SectionReader`], and the
//! reader it hands back from a join implements it too, so joined content can
//! be re-split or sliced without copying it out first.

use std::fs::File;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use memmap2::Mmap;

use crate::error::ChunkerError;

#[async_trait]
pub trait SectionReader: Send + Sync {
    /// Total length of the section in bytes.
    fn size(&self) -> u64;

    /// Copy bytes starting at `offset` into `buf`. Returns how many were
    /// copied, which is short only at the end of the section.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, ChunkerError>;

    /// Read the whole section into memory.
    async fn read_all(&self) -> Result<Vec<u8>, ChunkerError> {
        let len = usize::try_from(self.size()).map_err(|_| ChunkerError::OversizedInput(self.size()))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.read_at(&mut buf[filled..], filled as u64).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

fn copy_from(src: &[u8], buf: &mut [u8], offset: u64) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= src.len() {
        return 0;
    }
    let n = buf.len().min(src.len() - start);
    buf[..n].copy_from_slice(&src[start..start + n]);
    n
}

/// In-memory section.
#[derive(Debug, Clone)]
pub struct ArrayReader {
    data: Bytes,
}

impl ArrayReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl SectionReader for ArrayReader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, ChunkerError> {
        Ok(copy_from(&self.data, buf, offset))
    }
}

/// Memory-mapped file section.
pub struct FileReader {
    // None for empty files, which cannot be mapped
    mmap: Option<Mmap>,
}

impl FileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChunkerError> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self { mmap: None });
        }
        // Safety: the file is opened read-only and the map is never mutated
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap: Some(mmap) })
    }
}

#[async_trait]
impl SectionReader for FileReader {
    fn size(&self) -> u64 {
        self.mmap.as_ref().map(|m| m.len() as u64).unwrap_or(0)
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, ChunkerError> {
        Ok(self
            .mmap
            .as_ref()
            .map(|m| copy_from(m, buf, offset))
            .unwrap_or(0))
    }
}

/// A window `[offset, offset + len)` into another reader.
pub struct SlicedReader<R> {
    inner: R,
    offset: u64,
    len: u64,
}

impl<R: SectionReader> SlicedReader<R> {
    /// The window is clamped to the end of `inner`.
    pub fn new(inner: R, offset: u64, len: u64) -> Self {
        let offset = offset.min(inner.size());
        let len = len.min(inner.size() - offset);
        Self { inner, offset, len }
    }
}

#[async_trait]
impl<R: SectionReader> SectionReader for SlicedReader<R> {
    fn size(&self) -> u64 {
        self.len
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, ChunkerError> {
        if offset >= self.len {
            return Ok(0);
        }
        let want = buf.len().min((self.len - offset).min(usize::MAX as u64) as usize);
        self.inner.read_at(&mut buf[..want], self.offset + offset).await
    }
}
