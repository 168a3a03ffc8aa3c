//! Swarm integration tests.
//!
//! Nodes run in-process and talk over channel links that carry encoded
//! wire messages (see `infra`). No sockets, no root.
//!
//!   cargo test --test integration

mod infra;
mod retrieval;
mod storage;

pub use infra::*;
