use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;

use swarm_core::{Chunk, ChunkHasher, Key, Message};
use swarm_store::{ArrayReader, ChunkStore, NetStoreConfig, Peer, SectionReader, StoreError};

use crate::*;

/// A chunk held by one end of a three-node chain is fetched by the other
/// end through the middle node.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retrieve_through_a_chain() -> Result<()> {
    let n1 = TestNode::new(1);
    let n2 = TestNode::new(2);
    let n3 = TestNode::new(3);

    let chunk = Chunk::new(ChunkHasher::Blake3, Bytes::from_static(b"far away"));
    n1.store.local().put(&chunk)?;

    connect(&n1, &n2);
    connect(&n2, &n3);

    let got = n3.get(chunk.key()).await?;
    assert_eq!(got, chunk);
    // the middle node kept a copy on the way through
    assert!(n2.has_locally(chunk.key()));
    assert_eq!(n2.store.pending_requests(), 0);
    assert_eq!(n3.store.pending_requests(), 0);
    Ok(())
}

/// Content split on one node is read back whole, and in pieces, on another.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dpa_across_nodes() -> Result<()> {
    let n1 = TestNode::new(1);
    let n2 = TestNode::new(2);
    connect(&n1, &n2);

    let data = content(20_000);
    let root = n1.dpa.store(&ArrayReader::new(data.clone())).await?;

    let reader = tokio::time::timeout(Duration::from_secs(10), n2.dpa.retrieve(&root)).await??;
    assert_eq!(reader.size(), data.len() as u64);

    let mut buf = vec![0u8; 1000];
    let n = reader.read_at(&mut buf, 12_345).await?;
    assert_eq!(n, 1000);
    assert_eq!(&buf[..], &data[12_345..13_345]);

    assert_eq!(reader.read_all().await?, data);
    Ok(())
}

/// Two lookups racing for the same missing key cause one request to the
/// neighbour, and both are answered when the chunk turns up.
#[tokio::test]
async fn test_concurrent_lookups_send_one_request() -> Result<()> {
    let n1 = TestNode::new(1);
    let n2 = TestNode::new(2);
    connect(&n1, &n2);

    let chunk = Chunk::new(ChunkHasher::Blake3, Bytes::from_static(b"late arrival"));
    let first = n2.store.get_async(chunk.key());
    let second = n2.store.get_async(chunk.key());

    wait_for("retrieve request at n1", || n1.store.pending_requests() == 1).await?;
    assert_eq!(n2.retrieves_sent(chunk.key()), 1);

    // n1 gets the chunk and answers the request it is holding for n2
    n1.store.put(chunk.clone()).await?;

    let (a, b) = tokio::time::timeout(Duration::from_secs(10), async {
        (first.await, second.await)
    })
    .await?;
    assert_eq!(a?, chunk);
    assert_eq!(b?, chunk);
    assert_eq!(n2.retrieves_sent(chunk.key()), 1);
    Ok(())
}

/// A key nobody has fails once the search gives up.
#[tokio::test]
async fn test_missing_chunk_is_not_found() -> Result<()> {
    let config = NetStoreConfig {
        search_timeout: Duration::from_millis(200),
        ..NetStoreConfig::default()
    };
    let n1 = TestNode::with_config(1, config.clone());
    let n2 = TestNode::with_config(2, config);
    connect(&n1, &n2);

    let key = Key::new([0x5a; 32]);
    let err = tokio::time::timeout(Duration::from_secs(5), n2.store.get(&key))
        .await?
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(k) if k == key));

    // n1 searched on n2's behalf, but only n2 was asking
    assert_eq!(n1.retrieves_sent(&key), 0);
    wait_for("n1 search to expire", || n1.store.pending_requests() == 0).await?;
    Ok(())
}

/// A zero-key request is a neighbour query: the answer lists peers close
/// to the asker, and the asker learns them.
#[tokio::test]
async fn test_zero_key_returns_neighbours() -> Result<()> {
    let n1 = TestNode::new(1);
    let n2 = TestNode::new(2);
    let n3 = TestNode::new(3);
    connect(&n1, &n2);
    connect(&n2, &n3);
    assert!(!n1.known_nodes().contains(&n3.addr));

    let to_n2 = n1.link_to(&n2).expect("n1 is connected to n2");
    to_n2.send(Message::RetrieveRequest {
        id: 1,
        key: Key::zero(),
    });

    wait_for("n1 to learn about n3", || n1.known_nodes().contains(&n3.addr)).await?;
    // the answer never names the asker
    assert!(!n1.known_nodes().contains(&n1.addr));
    assert_eq!(n2.store.pending_requests(), 0);
    Ok(())
}
