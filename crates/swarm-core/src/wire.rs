//! Swarm wire messages — the logical fields exchanged between peers.
//!
//! Framing and the handshake belong to the transport. This module only
//! fixes what a message carries and offers a JSON codec so any transport
//! that moves byte strings can carry them.

use std::fmt;
use std::net::IpAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::Key;

/// Upper bound on an encoded message, the bzz protocol limit.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Network address and overlay identity of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: IpAddr,
    pub port: u16,
    /// Overlay address. Peers are ranked by XOR distance of this id to a key.
    pub id: Key,
}

impl PeerAddress {
    pub fn new(ip: IpAddr, port: u16, id: Key) -> Self {
        Self { ip, port, id }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", &self.id.to_hex()[..8], self.ip, self.port)
    }
}

/// A message between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Push a chunk to a peer. `id` is set when the push answers a
    /// retrieve request and echoes that request's id.
    StoreRequest {
        id: Option<u64>,
        key: Key,
        data: Bytes,
    },

    /// Ask a peer for a chunk. The zero key asks for peers near the
    /// sender's own address instead.
    RetrieveRequest { id: u64, key: Key },

    /// Candidate peers for `key`, sent straight back on every retrieve request.
    Peers {
        peers: Vec<PeerAddress>,
        timeout_secs: u64,
        key: Key,
        id: u64,
    },
}

impl Message {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StoreRequest { .. } => "store_request",
            Message::RetrieveRequest { .. } => "retrieve_request",
            Message::Peers { .. } => "peers",
        }
    }

    pub fn key(&self) -> &Key {
        match self {
            Message::StoreRequest { key, .. }
            | Message::RetrieveRequest { key, .. }
            | Message::Peers { key, .. } => key,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let bytes = serde_json::to_vec(self).map_err(WireError::Encode)?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(WireError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(WireError::TooLarge(bytes.len()));
        }
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(serde_json::Error),

    #[error("message of {0} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit")]
    TooLarge(usize),
}
