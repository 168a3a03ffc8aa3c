use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;

use swarm_core::{Chunk, ChunkHasher, Message};
use swarm_store::{
    ArrayReader, ChunkStore, Chunker, DiskStore, LocalStore, MemStore, Peer, SectionReader,
    TreeChunker,
};

use crate::*;

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_dir(name: &str) -> std::path::PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("swarm-it-{name}-{}-{id}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// A locally stored chunk is pushed to the node's neighbours.
#[tokio::test]
async fn test_put_reaches_neighbours() -> Result<()> {
    let hub = TestNode::new(1);
    let left = TestNode::new(2);
    let right = TestNode::new(3);
    connect(&hub, &left);
    connect(&hub, &right);

    let chunk = Chunk::new(ChunkHasher::Blake3, Bytes::from_static(b"spread me"));
    hub.store.put(chunk.clone()).await?;

    wait_for("left copy", || left.has_locally(chunk.key())).await?;
    wait_for("right copy", || right.has_locally(chunk.key())).await?;

    // neither neighbour echoes it back to the hub
    let echoes = |node: &TestNode| {
        node.sent
            .lock()
            .iter()
            .filter(|(to, m)| *to == hub.addr && matches!(m, Message::StoreRequest { .. }))
            .count()
    };
    assert_eq!(echoes(&left), 0);
    assert_eq!(echoes(&right), 0);
    assert_eq!(hub.store.stats().snapshot().out_store, 2);
    Ok(())
}

/// A peer pushing data that does not hash to its key gets nothing stored.
#[tokio::test]
async fn test_forged_push_is_dropped() -> Result<()> {
    let honest = TestNode::new(1);
    let liar = TestNode::new(2);
    connect(&honest, &liar);

    let real = Chunk::new(ChunkHasher::Blake3, Bytes::from_static(b"real"));
    let to_honest = liar.link_to(&honest).expect("connected");
    to_honest.send(Message::StoreRequest {
        id: None,
        key: *real.key(),
        data: Bytes::from_static(b"fake"),
    });
    // a genuine push right behind it shows the link is flowing
    let other = Chunk::new(ChunkHasher::Blake3, Bytes::from_static(b"other"));
    to_honest.send(Message::StoreRequest {
        id: None,
        key: *other.key(),
        data: other.data().clone(),
    });

    wait_for("genuine chunk", || honest.has_locally(other.key())).await?;
    assert!(!honest.has_locally(real.key()));
    assert_eq!(honest.store.stats().snapshot().in_store, 2);
    Ok(())
}

/// Content written through a disk-backed local store survives reopening
/// the store, and reads fall through to disk once the memory tier is cold.
#[tokio::test]
async fn test_disk_tier_survives_reopen() -> Result<()> {
    let dir = temp_dir("reopen");
    let chunker = TreeChunker::new(TEST_BRANCHES, ChunkHasher::Sha256);
    let data = content(5_000);

    let root = {
        let disk = DiskStore::new(&dir)?;
        let store = LocalStore::new(MemStore::with_capacity(8), Arc::new(disk));
        chunker.split(&ArrayReader::new(data.clone()), &store).await?
    };

    let disk = DiskStore::new(&dir)?;
    assert!(disk.count() > 8);
    let store: Arc<dyn ChunkStore> =
        Arc::new(LocalStore::new(MemStore::with_capacity(8), Arc::new(disk)));
    let reader = chunker.join(store, &root).await?;
    assert_eq!(reader.read_all().await?, data);

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
