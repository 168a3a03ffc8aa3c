//! swarmd — store and retrieve content through the local chunk store.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use swarm_core::config::SwarmConfig;
use swarm_core::Key;
use swarm_store::{DiskStore, Dpa, FileReader, LocalStore, MemStore, SectionReader, TreeChunker};

const COPY_BUFFER: usize = 64 * 1024;

struct Node {
    dpa: Dpa,
    disk: DiskStore,
}

fn open_node(config: &SwarmConfig) -> Result<Node> {
    let disk = DiskStore::new(&config.store.db_path).with_context(|| {
        format!(
            "failed to open chunk store at {}",
            config.store.db_path.display()
        )
    })?;
    let local = LocalStore::new(
        MemStore::with_capacity(config.store.mem_capacity),
        Arc::new(disk.clone()),
    );
    let chunker = TreeChunker::from_config(&config.chunker);
    Ok(Node {
        dpa: Dpa::new(Arc::new(chunker), Arc::new(local)),
        disk,
    })
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_store(config: &SwarmConfig, file: &str) -> Result<()> {
    let node = open_node(config)?;
    let reader = FileReader::open(file).with_context(|| format!("failed to open {}", file))?;
    let size = reader.size();
    let key = node
        .dpa
        .store(&reader)
        .await
        .with_context(|| format!("failed to store {}", file))?;
    tracing::info!(key = %key, size, file, "stored");
    println!("{}", key);
    Ok(())
}

async fn cmd_retrieve(config: &SwarmConfig, key: &str, out: &str) -> Result<()> {
    let key = Key::from_hex(key).context("key must be 64 hex characters")?;
    let node = open_node(config)?;
    let reader = node
        .dpa
        .retrieve(&key)
        .await
        .with_context(|| format!("failed to open {}", key))?;

    let path = Path::new(out);
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut offset = 0u64;
    while offset < reader.size() {
        let n = reader
            .read_at(&mut buf, offset)
            .await
            .with_context(|| format!("failed to read {} at offset {}", key, offset))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .with_context(|| format!("failed to write {}", path.display()))?;
        offset += n as u64;
    }
    file.sync_all()?;

    tracing::info!(key = %key, size = offset, out, "retrieved");
    println!("{} bytes written to {}", offset, path.display());
    Ok(())
}

fn cmd_stat(config: &SwarmConfig) -> Result<()> {
    let node = open_node(config)?;
    println!("═══════════════════════════════════════");
    println!("  Swarm Chunk Store");
    println!("═══════════════════════════════════════");
    println!("  Path      : {}", node.disk.root().display());
    println!("  Chunks    : {}", node.disk.count());
    println!("  Size      : {} bytes", node.disk.size());
    println!("  Branches  : {}", config.chunker.branches);
    println!("  Hasher    : {:?}", config.chunker.hasher);
    Ok(())
}

fn print_usage() {
    println!("Usage: swarmd [--config <path>] <command>");
    println!();
    println!("Commands:");
    println!("  store <file>           Split a file into the store, print its root key");
    println!("  retrieve <key> <out>   Write the content under <key> to <out>");
    println!("  stat                   Show chunk store statistics");
    println!("  help                   Show this message");
    println!();
    println!("Environment:");
    println!("  SWARM_CONFIG           Config file path");
    println!("  RUST_LOG               Log filter, e.g. swarm_store=debug");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --config option
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" {
            i += 1;
            let path = args.get(i).context("--config requires a value")?;
            std::env::set_var("SWARM_CONFIG", path);
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    if let Err(e) = SwarmConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = SwarmConfig::load().context("failed to load config")?;

    match remaining.as_slice() {
        ["store", file]                => cmd_store(&config, file).await,
        ["retrieve", key, out]         => cmd_retrieve(&config, key, out).await,
        ["stat"]                       => cmd_stat(&config),
        ["help"] | ["--help"] | ["-h"] => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
