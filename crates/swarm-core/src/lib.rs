//! swarm-core — keys, chunks, wire messages and configuration.
//! All other swarm crates depend on this one.

pub mod chunk;
pub mod config;
pub mod key;
pub mod wire;

pub use chunk::{Chunk, TREE_HEADER_SIZE};
pub use key::{ChunkHasher, Key, KEY_SIZE};
pub use wire::{Message, PeerAddress};
