//! Configuration system for the swarm store.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SWARM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/swarm/config.toml
//!   3. ~/.config/swarm/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::key::ChunkHasher;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub chunker: ChunkerConfig,
    pub store: StoreConfig,
    pub net: NetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Children per interior chunk. Chunk size is `branches * 32`.
    pub branches: usize,
    /// Digest used for chunk keys.
    pub hasher: ChunkHasher,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Chunks kept in the in-memory tier.
    pub mem_capacity: usize,
    /// Root directory of the persistent tier.
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Max peer requesters answered per key while a search is running.
    pub requester_count: usize,
    /// Peers a locally stored chunk is pushed to.
    pub max_store_peers: usize,
    /// Peers asked during a search.
    pub max_search_peers: usize,
    /// How long a search stays open. Also sent to requesters as a
    /// timeout hint.
    pub search_timeout_secs: u64,
    /// How long a store push waits for `max_store_peers` peers to show up.
    pub store_timeout_secs: u64,
    /// Check `hash(data) == key` on chunks delivered by peers.
    pub verify_chunks: bool,
}

impl NetConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            branches: 128,
            hasher: ChunkHasher::Blake3,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mem_capacity: 5000,
            db_path: data_dir().join("chunks"),
        }
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            requester_count: 3,
            max_store_peers: 3,
            max_search_peers: 6,
            search_timeout_secs: 600,
            store_timeout_secs: 10,
            verify_chunks: true,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("swarm")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("swarm")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid value: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SwarmConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SwarmConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SWARM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SwarmConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the chunker and stores cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunker.branches < 2 {
            return Err(ConfigError::Invalid(format!(
                "chunker.branches must be at least 2, got {}",
                self.chunker.branches
            )));
        }
        if self.store.mem_capacity == 0 {
            return Err(ConfigError::Invalid("store.mem_capacity must be non-zero".into()));
        }
        Ok(())
    }

    /// Apply SWARM_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SWARM_CHUNKER__BRANCHES") {
            if let Ok(n) = v.parse() {
                self.chunker.branches = n;
            }
        }
        if let Ok(v) = std::env::var("SWARM_CHUNKER__HASHER") {
            if let Ok(h) = v.parse() {
                self.chunker.hasher = h;
            }
        }
        if let Ok(v) = std::env::var("SWARM_STORE__DB_PATH") {
            self.store.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SWARM_STORE__MEM_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.store.mem_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("SWARM_NET__SEARCH_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.net.search_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SWARM_NET__STORE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.net.store_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SWARM_NET__VERIFY_CHUNKS") {
            self.net.verify_chunks = v == "true" || v == "1";
        }
    }
}
