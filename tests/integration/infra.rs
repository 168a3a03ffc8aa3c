//! In-process swarm: nodes joined by channel links.
//!
//! Every message crosses a link as bytes, encoded and decoded with the wire
//! codec, and is handled on the receiving node's own task, the way a real
//! transport would deliver it.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use swarm_core::{ChunkHasher, Key, Message, PeerAddress};
use swarm_store::{
    ChunkStore, Dpa, Hive, LocalStore, MemStore, NetStore, NetStoreConfig, Peer, PeerTable,
    TreeChunker,
};

/// Small trees so modest inputs span several levels.
pub const TEST_BRANCHES: usize = 4;

pub struct TestNode {
    pub addr: PeerAddress,
    pub store: NetStore,
    pub table: Arc<PeerTable>,
    pub dpa: Dpa,
    /// Every message this node sent, with its destination.
    pub sent: Arc<Mutex<Vec<(PeerAddress, Message)>>>,
}

impl TestNode {
    pub fn new(n: u8) -> Self {
        Self::with_config(n, NetStoreConfig::default())
    }

    pub fn with_config(n: u8, config: NetStoreConfig) -> Self {
        let addr = node_addr(n);
        let table = Arc::new(PeerTable::new(addr));
        let local = LocalStore::new(
            MemStore::with_capacity(4096),
            Arc::new(MemStore::with_capacity(4096)),
        );
        let store = NetStore::new(local, table.clone(), config);
        let dpa = Dpa::new(
            Arc::new(TreeChunker::new(TEST_BRANCHES, ChunkHasher::Blake3)),
            Arc::new(store.clone()),
        );
        Self {
            addr,
            store,
            table,
            dpa,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Our link to `other`, if connected.
    pub fn link_to(&self, other: &TestNode) -> Option<Arc<dyn Peer>> {
        self.table
            .closest_peers(&other.addr.id, 1)
            .into_iter()
            .find(|p| p.address() == other.addr)
    }

    /// Retrieve requests this node sent for `key`.
    pub fn retrieves_sent(&self, key: &Key) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(_, m)| matches!(m, Message::RetrieveRequest { key: k, .. } if k == key))
            .count()
    }

    pub fn has_locally(&self, key: &Key) -> bool {
        matches!(self.store.local().get(key), Ok(Some(_)))
    }

    pub fn known_nodes(&self) -> Vec<PeerAddress> {
        self.table.select_nodes(&Key::zero(), usize::MAX)
    }

    pub async fn get(&self, key: &Key) -> Result<swarm_core::Chunk> {
        let chunk = tokio::time::timeout(Duration::from_secs(10), self.store.get(key)).await??;
        match chunk {
            Some(chunk) => Ok(chunk),
            None => bail!("no chunk for {key}"),
        }
    }
}

pub fn node_addr(n: u8) -> PeerAddress {
    let mut id = [0u8; 32];
    id[0] = n;
    id[31] = 0xaa;
    PeerAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)), 30303, Key::new(id))
}

/// One direction of a connection, as seen by the sending node.
struct Link {
    remote: PeerAddress,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    log: Arc<Mutex<Vec<(PeerAddress, Message)>>>,
}

impl Peer for Link {
    fn address(&self) -> PeerAddress {
        self.remote
    }

    fn send(&self, msg: Message) {
        match msg.encode() {
            Ok(bytes) => {
                self.log.lock().push((self.remote, msg));
                // the remote may be gone; that is a lost message, not an error
                let _ = self.tx.send(bytes);
            }
            Err(e) => tracing::warn!(peer = %self.remote, error = %e, "dropping unencodable message"),
        }
    }
}

/// Deliver everything arriving on `rx` to `store`, as sent by `from`.
async fn pump(mut rx: mpsc::UnboundedReceiver<Vec<u8>>, store: NetStore, from: Arc<dyn Peer>) {
    while let Some(bytes) = rx.recv().await {
        match Message::decode(&bytes) {
            Ok(msg) => store.handle_message(&from, msg),
            Err(e) => tracing::warn!(peer = %from.address(), error = %e, "undecodable message"),
        }
    }
}

/// Connect two nodes both ways.
pub fn connect(a: &TestNode, b: &TestNode) {
    let (tx_ab, rx_ab) = mpsc::unbounded_channel();
    let (tx_ba, rx_ba) = mpsc::unbounded_channel();

    let b_at_a: Arc<dyn Peer> = Arc::new(Link {
        remote: b.addr,
        tx: tx_ab,
        log: a.sent.clone(),
    });
    let a_at_b: Arc<dyn Peer> = Arc::new(Link {
        remote: a.addr,
        tx: tx_ba,
        log: b.sent.clone(),
    });

    tokio::spawn(pump(rx_ab, b.store.clone(), a_at_b.clone()));
    tokio::spawn(pump(rx_ba, a.store.clone(), b_at_a.clone()));

    a.table.add_peer(b_at_a);
    b.table.add_peer(a_at_b);
}

/// Poll `cond` until it holds, failing after a few seconds.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..500 {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("timed out waiting for {what}")
}

/// Deterministic test content.
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 256) as u8).collect()
}
