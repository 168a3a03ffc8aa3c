//! Peer routing: who to ask for a key.
//!
//! The [`Hive`] knows the connected peers and the addresses other peers have
//! told us about. It ranks both by XOR distance to a key and runs fan-out
//! tasks that apply an action to the closest peers, waiting for more peers to
//! connect until either enough have been processed or the task times out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use swarm_core::{Key, Message, PeerAddress};
use tokio::sync::Notify;

/// A connected peer.
pub trait Peer: Send + Sync {
    fn address(&self) -> PeerAddress;

    /// Queue a message for the peer. Delivery is best effort.
    fn send(&self, msg: Message);
}

/// Applied once to each peer a fan-out task selects.
pub type PeerAction = Arc<dyn Fn(&Arc<dyn Peer>) + Send + Sync>;

#[async_trait]
pub trait Hive: Send + Sync {
    /// Up to `max` known addresses closest to `key`.
    fn select_nodes(&self, key: &Key, max: usize) -> Vec<PeerAddress>;

    /// Remember addresses learned from a peers message.
    fn add_peer_records(&self, records: &[PeerAddress]);

    /// Apply `action` to the closest connected peers to `key`, at most
    /// `max_peers` of them, each at most once. Returns once `max_peers` peers
    /// were processed or `timeout` elapsed.
    async fn run_task(&self, key: Key, timeout: Duration, max_peers: usize, action: PeerAction);
}

/// In-memory routing table.
pub struct PeerTable {
    self_addr: PeerAddress,
    peers: DashMap<Key, Arc<dyn Peer>>,
    records: DashMap<Key, PeerAddress>,
    added: Notify,
}

impl PeerTable {
    pub fn new(self_addr: PeerAddress) -> Self {
        Self {
            self_addr,
            peers: DashMap::new(),
            records: DashMap::new(),
            added: Notify::new(),
        }
    }

    pub fn self_address(&self) -> &PeerAddress {
        &self.self_addr
    }

    /// Register a connected peer and wake any running tasks.
    pub fn add_peer(&self, peer: Arc<dyn Peer>) {
        let addr = peer.address();
        if addr.id == self.self_addr.id {
            return;
        }
        tracing::debug!(peer = %addr, "peer connected");
        self.records.insert(addr.id, addr);
        self.peers.insert(addr.id, peer);
        self.added.notify_waiters();
    }

    pub fn remove_peer(&self, id: &Key) -> Option<Arc<dyn Peer>> {
        self.peers.remove(id).map(|(_, peer)| {
            tracing::debug!(peer = %peer.address(), "peer disconnected");
            peer
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Connected peers, closest to `key` first.
    pub fn closest_peers(&self, key: &Key, max: usize) -> Vec<Arc<dyn Peer>> {
        let mut ranked: Vec<(Key, Arc<dyn Peer>)> = self
            .peers
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        ranked.sort_by_key(|(id, _)| id.distance(key));
        ranked.into_iter().take(max).map(|(_, peer)| peer).collect()
    }
}

#[async_trait]
impl Hive for PeerTable {
    fn select_nodes(&self, key: &Key, max: usize) -> Vec<PeerAddress> {
        let mut nodes: Vec<PeerAddress> = self.records.iter().map(|e| *e.value()).collect();
        nodes.sort_by_key(|addr| addr.id.distance(key));
        nodes.truncate(max);
        nodes
    }

    fn add_peer_records(&self, records: &[PeerAddress]) {
        for addr in records {
            if addr.id != self.self_addr.id && !addr.id.is_zero() {
                self.records.entry(addr.id).or_insert(*addr);
            }
        }
    }

    async fn run_task(&self, key: Key, timeout: Duration, max_peers: usize, action: PeerAction) {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut processed = HashSet::new();
        while processed.len() < max_peers {
            // registered before the scan so a peer added mid-scan still wakes us
            let added = self.added.notified();
            for peer in self.closest_peers(&key, usize::MAX) {
                if processed.len() >= max_peers {
                    break;
                }
                if processed.insert(peer.address().id) {
                    action(&peer);
                }
            }
            if processed.len() >= max_peers {
                break;
            }
            if tokio::time::timeout_at(deadline, added).await.is_err() {
                break;
            }
        }
        tracing::trace!(key = %key, peers = processed.len(), "hive task finished");
    }
}
