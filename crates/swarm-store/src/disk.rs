//! Content-addressed chunk files on disk — the persistent tier.
//!
//! Chunks are stored by key in a two-level directory structure:
//!   {root}/{key[0..2]}/{full_key}
//!
//! This is the same layout Git uses for objects. Files are immutable.
//! If the key exists, the content is what was stored under it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;
use swarm_core::Key;

use crate::error::StoreError;
use crate::store::PersistentStore;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unavailable(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Unavailable {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Clone)]
pub struct DiskStore {
    root: Arc<PathBuf>,
}

impl DiskStore {
    /// Open a store rooted at the given directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| unavailable(&root, e))?;
        Ok(Self {
            root: Arc::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has(&self, key: &Key) -> bool {
        self.chunk_path(key).exists()
    }

    fn chunk_path(&self, key: &Key) -> PathBuf {
        let hex = key.to_hex();
        // Two-level: chunks/ab/abc123...
        self.root.join(&hex[0..2]).join(&hex)
    }

    /// Count stored chunks (for stats).
    pub fn count(&self) -> usize {
        let mut total = 0;
        if let Ok(entries) = fs::read_dir(&*self.root) {
            for entry in entries.flatten() {
                if let Ok(subdir) = fs::read_dir(entry.path()) {
                    total += subdir.count();
                }
            }
        }
        total
    }

    /// Total stored bytes (for stats).
    pub fn size(&self) -> u64 {
        let mut total = 0u64;
        if let Ok(entries) = fs::read_dir(&*self.root) {
            for entry in entries.flatten() {
                if let Ok(subdir) = fs::read_dir(entry.path()) {
                    for chunk in subdir.flatten() {
                        if let Ok(meta) = chunk.metadata() {
                            total += meta.len();
                        }
                    }
                }
            }
        }
        total
    }

    pub fn clear(&self) {
        if let Ok(entries) = fs::read_dir(&*self.root) {
            for entry in entries.flatten() {
                let _ = fs::remove_dir_all(entry.path());
            }
        }
    }
}

impl PersistentStore for DiskStore {
    /// The file is mapped and copied out; page faults pull data from the
    /// kernel page cache on demand.
    fn get(&self, key: &Key) -> Result<Option<Bytes>, StoreError> {
        let path = self.chunk_path(key);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&path, e)),
        };
        let len = file.metadata().map_err(|e| unavailable(&path, e))?.len();
        if len == 0 {
            // empty files cannot be mapped
            return Ok(Some(Bytes::new()));
        }

        // Safety: file is opened read-only and we don't mutate the mmap
        let mmap = unsafe { Mmap::map(&file).map_err(|e| unavailable(&path, e))? };
        Ok(Some(Bytes::copy_from_slice(&mmap)))
    }

    /// Writes are atomic: write to a temp file, fsync, then rename. If the
    /// chunk already exists this is a no-op.
    fn put(&self, key: &Key, data: &[u8]) -> Result<(), StoreError> {
        let path = self.chunk_path(key);
        if path.exists() {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| unavailable(parent, e))?;
        }

        // unique per writer so concurrent puts of one key cannot interleave
        let tmp_path = path.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        {
            let mut file = fs::File::create(&tmp_path).map_err(|e| unavailable(&tmp_path, e))?;
            file.write_all(data).map_err(|e| unavailable(&tmp_path, e))?;
            file.sync_all().map_err(|e| unavailable(&tmp_path, e))?;
        }

        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(unavailable(&path, e));
        }

        tracing::trace!(key = %key, bytes = data.len(), "chunk persisted");
        Ok(())
    }
}
