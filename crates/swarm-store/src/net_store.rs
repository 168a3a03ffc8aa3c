//! Network-backed chunk store.
//!
//! Wraps a [`LocalStore`] and, on a local miss, asks peers chosen by the
//! [`Hive`]. Concurrent lookups of one key share a single search. A chunk
//! that arrives while a search is in flight is handed to every local waiter
//! and forwarded to the peers that asked us for it.
//!
//! The request table is a `DashMap`; every read-modify-write of one key's
//! entry happens under that entry's shard lock. A put writes the local tiers
//! before taking the entry out of the table, and a lookup that finds no entry
//! checks the local tiers again under the lock, so a waiter is either in the
//! table when the chunk is fanned out or sees the chunk locally.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use swarm_core::config::NetConfig;
use swarm_core::{Chunk, ChunkHasher, Key, Message, PeerAddress};
use tokio::sync::oneshot;

use crate::error::StoreError;
use crate::hive::{Hive, Peer, PeerAction};
use crate::local_store::LocalStore;
use crate::store::ChunkStore;

#[derive(Debug, Clone)]
pub struct NetStoreConfig {
    /// Peers forwarded a found chunk, per key.
    pub requester_count: usize,
    /// Peers a locally originated chunk is pushed to.
    pub max_store_peers: usize,
    /// Peers asked for a missing chunk.
    pub max_search_peers: usize,
    /// How long a search runs before its waiters fail with `NotFound`.
    pub search_timeout: Duration,
    /// How long a store push waits for peers. The push holds the chunk
    /// data until then.
    pub store_timeout: Duration,
    /// Drop network chunks whose data does not hash to their key.
    pub verify_chunks: bool,
    pub hasher: ChunkHasher,
}

impl Default for NetStoreConfig {
    fn default() -> Self {
        Self::from_config(&NetConfig::default(), ChunkHasher::default())
    }
}

impl NetStoreConfig {
    pub fn from_config(net: &NetConfig, hasher: ChunkHasher) -> Self {
        Self {
            requester_count: net.requester_count,
            max_store_peers: net.max_store_peers,
            max_search_peers: net.max_search_peers,
            search_timeout: net.search_timeout(),
            store_timeout: net.store_timeout(),
            verify_chunks: net.verify_chunks,
            hasher,
        }
    }
}

/// Message counters. Observability only.
#[derive(Debug, Default)]
pub struct NetStats {
    in_store: AtomicU64,
    in_retrieve: AtomicU64,
    out_store: AtomicU64,
    out_retrieve: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetStatsSnapshot {
    pub in_store: u64,
    pub in_retrieve: u64,
    pub out_store: u64,
    pub out_retrieve: u64,
}

impl NetStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NetStatsSnapshot {
        NetStatsSnapshot {
            in_store: self.in_store.load(Ordering::Relaxed),
            in_retrieve: self.in_retrieve.load(Ordering::Relaxed),
            out_store: self.out_store.load(Ordering::Relaxed),
            out_retrieve: self.out_retrieve.load(Ordering::Relaxed),
        }
    }

    pub fn log(&self) {
        let s = self.snapshot();
        tracing::info!(
            in_store = s.in_store,
            in_retrieve = s.in_retrieve,
            out_store = s.out_store,
            out_retrieve = s.out_retrieve,
            "net store stats"
        );
    }
}

struct Requester {
    peer: Arc<dyn Peer>,
    id: u64,
}

/// An unresolved lookup. Present in the table while its search runs.
struct ChunkRequest {
    search_id: u64,
    requesters: Vec<Requester>,
    waiters: Vec<oneshot::Sender<Result<Chunk, StoreError>>>,
    // dropped when the request leaves the table, which stops its search task
    _cancel: oneshot::Sender<()>,
}

impl ChunkRequest {
    fn new(search_id: u64) -> (Self, oneshot::Receiver<()>) {
        let (cancel, cancelled) = oneshot::channel();
        let request = Self {
            search_id,
            requesters: Vec::new(),
            waiters: Vec::new(),
            _cancel: cancel,
        };
        (request, cancelled)
    }

    fn is_requester(&self, addr: &PeerAddress) -> bool {
        self.requesters.iter().any(|r| r.peer.address() == *addr)
    }

    /// Returns false if the requester was not recorded.
    fn add_requester(&mut self, requester: Requester, cap: usize) -> bool {
        let addr = requester.peer.address();
        if self
            .requesters
            .iter()
            .any(|r| r.id == requester.id && r.peer.address() == addr)
        {
            return true;
        }
        if self.requesters.len() >= cap {
            return false;
        }
        self.requesters.push(requester);
        true
    }
}

/// Completion handle returned by [`NetStore::get_async`].
pub struct Retrieval {
    rx: oneshot::Receiver<Result<Chunk, StoreError>>,
}

impl Retrieval {
    fn ready(result: Result<Chunk, StoreError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for Retrieval {
    type Output = Result<Chunk, StoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(StoreError::Closed)))
    }
}

/// Searches and fan-outs run on spawned tasks, so the network-facing
/// methods must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct NetStore {
    local: LocalStore,
    hive: Arc<dyn Hive>,
    requests: Arc<DashMap<Key, ChunkRequest>>,
    sources: Arc<DashMap<Key, PeerAddress>>,
    config: NetStoreConfig,
    stats: Arc<NetStats>,
    next_id: Arc<AtomicU64>,
}

impl NetStore {
    pub fn new(local: LocalStore, hive: Arc<dyn Hive>, config: NetStoreConfig) -> Self {
        Self {
            local,
            hive,
            requests: Arc::new(DashMap::new()),
            sources: Arc::new(DashMap::new()),
            config,
            stats: Arc::new(NetStats::default()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn hive(&self) -> &Arc<dyn Hive> {
        &self.hive
    }

    pub fn config(&self) -> &NetStoreConfig {
        &self.config
    }

    pub fn stats(&self) -> &NetStats {
        &self.stats
    }

    /// Keys with a search in flight.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Dispatch one inbound message from `peer`.
    pub fn handle_message(&self, peer: &Arc<dyn Peer>, msg: Message) {
        tracing::trace!(peer = %peer.address(), kind = msg.kind(), key = %msg.key(), "message received");
        let result = match msg {
            Message::StoreRequest { key, data, .. } => self.add_store_request(peer, key, data),
            Message::RetrieveRequest { id, key } => self.add_retrieve_request(peer, id, key),
            Message::Peers { peers, .. } => {
                self.hive.add_peer_records(&peers);
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(peer = %peer.address(), error = %e, "failed to handle message");
        }
    }

    /// A peer pushed a chunk to us, either on its own or answering a search.
    pub fn add_store_request(
        &self,
        peer: &Arc<dyn Peer>,
        key: Key,
        data: Bytes,
    ) -> Result<(), StoreError> {
        NetStats::bump(&self.stats.in_store);
        if self.local.get(&key)?.is_some() {
            return Ok(());
        }

        let chunk = Chunk::from_parts(key, data);
        if self.config.verify_chunks && !chunk.verify(self.config.hasher) {
            tracing::warn!(peer = %peer.address(), key = %key, "dropping chunk whose data does not match its key");
            return Ok(());
        }

        // so the store broadcast skips the peer we got it from
        self.sources.insert(key, peer.address());
        self.put_impl(chunk)
    }

    /// A peer asked us for a chunk. The peer always gets a peers hint; it
    /// gets the chunk now if we have it, or once our own search finds it.
    pub fn add_retrieve_request(
        &self,
        peer: &Arc<dyn Peer>,
        id: u64,
        key: Key,
    ) -> Result<(), StoreError> {
        NetStats::bump(&self.stats.in_retrieve);
        self.send_peers_hint(peer, id, key);
        if key.is_zero() {
            return Ok(());
        }

        if let Some(chunk) = self.local.get(&key)? {
            self.deliver_to(peer, id, &chunk);
            return Ok(());
        }

        let requester = Requester {
            peer: peer.clone(),
            id,
        };
        let search = match self.requests.entry(key) {
            Entry::Occupied(mut e) => {
                if !e.get_mut().add_requester(requester, self.config.requester_count) {
                    tracing::debug!(peer = %peer.address(), key = %key, "requester cap reached");
                }
                None
            }
            Entry::Vacant(e) => {
                if let Some(chunk) = self.local.get(&key)? {
                    self.deliver_to(peer, id, &chunk);
                    None
                } else {
                    let search_id = self.next_id();
                    let (mut request, cancelled) = ChunkRequest::new(search_id);
                    request.add_requester(requester, self.config.requester_count);
                    e.insert(request);
                    Some((search_id, cancelled))
                }
            }
        };
        if let Some((search_id, cancelled)) = search {
            self.start_search(key, search_id, cancelled);
        }
        Ok(())
    }

    /// Look a chunk up without blocking. Resolves at once on a local hit;
    /// otherwise joins the search for `key`, starting one if none is running.
    pub fn get_async(&self, key: &Key) -> Retrieval {
        match self.local.get(key) {
            Ok(Some(chunk)) => return Retrieval::ready(Ok(chunk)),
            Err(e) => return Retrieval::ready(Err(e)),
            Ok(None) => {}
        }

        let (tx, rx) = oneshot::channel();
        let search = match self.requests.entry(*key) {
            Entry::Occupied(mut e) => {
                tracing::debug!(key = %key, "joining search in flight");
                e.get_mut().waiters.push(tx);
                None
            }
            Entry::Vacant(e) => match self.local.get(key) {
                // stored between the first check and taking the lock
                Ok(Some(chunk)) => return Retrieval::ready(Ok(chunk)),
                Err(err) => return Retrieval::ready(Err(err)),
                Ok(None) => {
                    let search_id = self.next_id();
                    let (mut request, cancelled) = ChunkRequest::new(search_id);
                    request.waiters.push(tx);
                    e.insert(request);
                    Some((search_id, cancelled))
                }
            },
        };
        if let Some((search_id, cancelled)) = search {
            self.start_search(*key, search_id, cancelled);
        }
        Retrieval { rx }
    }

    /// Store locally, then either resolve the search for this key or push
    /// the chunk out to the closest peers. A chunk already stored with no
    /// search waiting on it is left alone.
    fn put_impl(&self, chunk: Chunk) -> Result<(), StoreError> {
        let source = self.sources.remove(chunk.key()).map(|(_, addr)| addr);
        if self.local.get(chunk.key())?.is_some() && !self.requests.contains_key(chunk.key()) {
            tracing::trace!(key = %chunk.key(), "chunk already stored");
            return Ok(());
        }
        self.local.put(&chunk)?;
        match self.requests.remove(chunk.key()) {
            Some((_, request)) => self.resolve(request, &chunk),
            None => self.broadcast(chunk, source),
        }
        Ok(())
    }

    fn resolve(&self, request: ChunkRequest, chunk: &Chunk) {
        tracing::info!(
            key = %chunk.key(),
            waiters = request.waiters.len(),
            requesters = request.requesters.len(),
            "chunk found"
        );
        for waiter in request.waiters {
            let _ = waiter.send(Ok(chunk.clone()));
        }
        for requester in &request.requesters {
            self.deliver_to(&requester.peer, requester.id, chunk);
        }
    }

    fn deliver_to(&self, peer: &Arc<dyn Peer>, id: u64, chunk: &Chunk) {
        NetStats::bump(&self.stats.out_store);
        peer.send(Message::StoreRequest {
            id: Some(id),
            key: *chunk.key(),
            data: chunk.data().clone(),
        });
    }

    fn send_peers_hint(&self, peer: &Arc<dyn Peer>, id: u64, key: Key) {
        let requester = peer.address();
        // the zero key asks for nodes near the requester itself
        let near = if key.is_zero() { requester.id } else { key };
        let mut peers = self
            .hive
            .select_nodes(&near, self.config.max_search_peers + 1);
        peers.retain(|addr| addr.id != requester.id);
        peers.truncate(self.config.max_search_peers);
        peer.send(Message::Peers {
            peers,
            timeout_secs: self.config.search_timeout.as_secs(),
            key,
            id,
        });
    }

    fn broadcast(&self, chunk: Chunk, source: Option<PeerAddress>) {
        let key = *chunk.key();
        let data = chunk.into_data();
        let stats = self.stats.clone();
        let action: PeerAction = Arc::new(move |peer: &Arc<dyn Peer>| {
            if source == Some(peer.address()) {
                return;
            }
            NetStats::bump(&stats.out_store);
            peer.send(Message::StoreRequest {
                id: None,
                key,
                data: data.clone(),
            });
        });

        tracing::debug!(key = %key, source = ?source, "broadcasting chunk");
        let hive = self.hive.clone();
        let timeout = self.config.store_timeout;
        let max_peers = self.config.max_store_peers;
        tokio::spawn(async move {
            hive.run_task(key, timeout, max_peers, action).await;
        });
    }

    fn start_search(&self, key: Key, search_id: u64, cancelled: oneshot::Receiver<()>) {
        tracing::info!(key = %key, search = search_id, "starting search");
        let store = self.clone();
        let deadline = tokio::time::Instant::now() + self.config.search_timeout;
        tokio::spawn(async move {
            let action = store.search_action(key, search_id);
            let search = async {
                store
                    .hive
                    .run_task(
                        key,
                        store.config.search_timeout,
                        store.config.max_search_peers,
                        action,
                    )
                    .await;
                tokio::time::sleep_until(deadline).await;
            };
            tokio::select! {
                _ = search => store.expire(&key, search_id),
                _ = cancelled => {}
            }
        });
    }

    fn search_action(&self, key: Key, search_id: u64) -> PeerAction {
        let requests = self.requests.clone();
        let stats = self.stats.clone();
        Arc::new(move |peer: &Arc<dyn Peer>| {
            let addr = peer.address();
            let asked_us = requests
                .get(&key)
                .map(|r| r.is_requester(&addr))
                .unwrap_or(false);
            if asked_us {
                return;
            }
            NetStats::bump(&stats.out_retrieve);
            peer.send(Message::RetrieveRequest { id: search_id, key });
        })
    }

    /// Retire a search that ran out of time. Local waiters fail with
    /// `NotFound`; remote requesters hear nothing.
    fn expire(&self, key: &Key, search_id: u64) {
        let Some((_, request)) = self
            .requests
            .remove_if(key, |_, r| r.search_id == search_id)
        else {
            return;
        };
        tracing::warn!(
            key = %key,
            waiters = request.waiters.len(),
            requesters = request.requesters.len(),
            "search expired"
        );
        for waiter in request.waiters {
            let _ = waiter.send(Err(StoreError::NotFound(*key)));
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl ChunkStore for NetStore {
    async fn put(&self, chunk: Chunk) -> Result<(), StoreError> {
        self.put_impl(chunk)
    }

    /// Waits for the search on a miss; fails with `NotFound` when it expires.
    async fn get(&self, key: &Key) -> Result<Option<Chunk>, StoreError> {
        self.get_async(key).await.map(Some)
    }
}
