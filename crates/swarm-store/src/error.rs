use std::path::PathBuf;

use swarm_core::Key;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Missed every local tier and the network search ran out of time.
    #[error("chunk {0} not found")]
    NotFound(Key),

    /// The persistent tier failed a read or write.
    #[error("persistent store unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store went away before the request resolved.
    #[error("store closed before the request resolved")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ChunkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A chunk in the tree disagrees with the shape its parent implies.
    #[error("malformed tree at chunk {key}: {reason}")]
    MalformedTree { key: Key, reason: String },

    #[error("input of {0} bytes is too large to chunk")]
    OversizedInput(u64),

    #[error("source read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ChunkerError {
    pub(crate) fn malformed(key: &Key, reason: impl Into<String>) -> Self {
        ChunkerError::MalformedTree {
            key: *key,
            reason: reason.into(),
        }
    }
}
