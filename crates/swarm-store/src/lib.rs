//! swarm-store — chunking and the chunk store family.
//!
//! [`TreeChunker`] turns content into a tree of chunks and back. Chunks live
//! in a [`ChunkStore`]: [`MemStore`], the tiered [`LocalStore`], or
//! [`NetStore`], which asks peers when the local tiers miss. [`Dpa`] pairs
//! a chunker with a store.

pub mod chunker;
pub mod disk;
pub mod dpa;
pub mod error;
pub mod hive;
pub mod local_store;
pub mod mem_store;
pub mod net_store;
pub mod reader;
pub mod store;

pub use chunker::{Chunker, LazyChunkReader, TreeChunker};
pub use disk::DiskStore;
pub use dpa::Dpa;
pub use error::{ChunkerError, StoreError};
pub use hive::{Hive, Peer, PeerAction, PeerTable};
pub use local_store::LocalStore;
pub use mem_store::MemStore;
pub use net_store::{NetStats, NetStatsSnapshot, NetStore, NetStoreConfig, Retrieval};
pub use reader::{ArrayReader, FileReader, SectionReader, SlicedReader};
pub use store::{ChunkStore, PersistentStore};
