//! Pool configuration and size parsing.
//!
//! A [`CacheConfig`] describes one cache pool: capacity, allocation
//! granularity, eviction policy, and optional default snapshot location.
//! Configs are serialized to JSON and stored in the metadata store so any
//! process can reattach a pool without out-of-band coordination.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default allocation granularity in bytes.
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;

/// Default soft ceiling on cached sequences per pool.
pub const DEFAULT_MAX_SEQUENCES: u64 = 10_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid size string: {0:?}")]
    InvalidSize(String),

    #[error("Pool size must be non-zero")]
    ZeroSize,

    #[error("Block size must be non-zero")]
    ZeroBlockSize,

    #[error("Pool size {size} is not a multiple of block size {block_size}")]
    UnalignedSize { size: u64, block_size: u64 },

    #[error("Unknown eviction policy: {0:?}")]
    InvalidPolicy(String),

    #[error("Unknown cache tier: {0:?}")]
    InvalidTier(String),
}

/// Eviction policy for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Least recently used: evict oldest-idle entries first.
    Lru,
    /// Least frequently used: evict lowest access_count first.
    Lfu,
    /// First in first out: evict oldest-created first.
    Fifo,
    /// Priority-based: evict lowest priority first, LRU within a priority.
    Priority,
}

impl CachePolicy {
    /// Encoding used in the segment header's policy byte.
    pub fn as_u8(self) -> u8 {
        match self {
            CachePolicy::Lru => 0,
            CachePolicy::Lfu => 1,
            CachePolicy::Fifo => 2,
            CachePolicy::Priority => 3,
        }
    }

    /// Decode the header policy byte, defaulting to LRU for unknown values.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => CachePolicy::Lfu,
            2 => CachePolicy::Fifo,
            3 => CachePolicy::Priority,
            _ => CachePolicy::Lru,
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePolicy::Lru => write!(f, "lru"),
            CachePolicy::Lfu => write!(f, "lfu"),
            CachePolicy::Fifo => write!(f, "fifo"),
            CachePolicy::Priority => write!(f, "priority"),
        }
    }
}

impl FromStr for CachePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(CachePolicy::Lru),
            "lfu" => Ok(CachePolicy::Lfu),
            "fifo" => Ok(CachePolicy::Fifo),
            "priority" => Ok(CachePolicy::Priority),
            other => Err(ConfigError::InvalidPolicy(other.to_string())),
        }
    }
}

/// Memory tier a pool is intended for. Informational only; the segment
/// itself always lives in system shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Cpu,
    Gpu,
    Disk,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Cpu => write!(f, "cpu"),
            CacheTier::Gpu => write!(f, "gpu"),
            CacheTier::Disk => write!(f, "disk"),
        }
    }
}

impl FromStr for CacheTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(CacheTier::Cpu),
            "gpu" => Ok(CacheTier::Gpu),
            "disk" => Ok(CacheTier::Disk),
            other => Err(ConfigError::InvalidTier(other.to_string())),
        }
    }
}

/// Configuration for one cache pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Unique pool name within the metadata store.
    pub name: String,

    /// Capacity of the data region in bytes. Must be an exact multiple
    /// of `block_size`.
    pub size_bytes: u64,

    /// Eviction policy.
    #[serde(default = "default_policy")]
    pub policy: CachePolicy,

    /// Intended memory tier (informational).
    #[serde(default = "default_tier")]
    pub tier: CacheTier,

    /// Soft ceiling on live entries; exceeding it triggers eviction on put.
    #[serde(default = "default_max_sequences")]
    pub max_sequences: u64,

    /// Allocation granularity in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: u64,

    /// Default snapshot location for persist/restore.
    #[serde(default)]
    pub persist_path: Option<PathBuf>,
}

fn default_policy() -> CachePolicy {
    CachePolicy::Lru
}

fn default_tier() -> CacheTier {
    CacheTier::Cpu
}

fn default_max_sequences() -> u64 {
    DEFAULT_MAX_SEQUENCES
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

impl CacheConfig {
    /// Create a config with default policy, tier, and granularity.
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            policy: default_policy(),
            tier: default_tier(),
            max_sequences: DEFAULT_MAX_SEQUENCES,
            block_size: DEFAULT_BLOCK_SIZE,
            persist_path: None,
        }
    }

    /// Check size/granularity invariants before a pool is created.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.size_bytes == 0 {
            return Err(ConfigError::ZeroSize);
        }
        if self.size_bytes % self.block_size != 0 {
            return Err(ConfigError::UnalignedSize {
                size: self.size_bytes,
                block_size: self.block_size,
            });
        }
        Ok(())
    }

    /// Number of allocation blocks in the data region.
    pub fn block_count(&self) -> u64 {
        self.size_bytes / self.block_size
    }
}

/// Parse a size string like "16G", "512M", "1024".
///
/// Suffixes K/M/G/T are powers of 1024; a bare number is bytes. A
/// fractional prefix is accepted ("1.5G").
pub fn parse_size(s: &str) -> Result<u64, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigError::InvalidSize(s.to_string()));
    }

    let upper = s.to_ascii_uppercase();
    let (number, multiplier) = match upper.as_bytes()[upper.len() - 1] {
        b'K' => (&upper[..upper.len() - 1], 1024u64),
        b'M' => (&upper[..upper.len() - 1], 1024u64.pow(2)),
        b'G' => (&upper[..upper.len() - 1], 1024u64.pow(3)),
        b'T' => (&upper[..upper.len() - 1], 1024u64.pow(4)),
        _ => (upper.as_str(), 1),
    };

    if multiplier == 1 {
        return number
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidSize(s.to_string()));
    }

    let value: f64 = number
        .parse()
        .map_err(|_| ConfigError::InvalidSize(s.to_string()))?;
    if value < 0.0 || !value.is_finite() {
        return Err(ConfigError::InvalidSize(s.to_string()));
    }
    Ok((value * multiplier as f64) as u64)
}

/// Base data directory (`~/.cortex`), falling back to the system temp dir
/// when no home directory is available.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".cortex")
}

/// Default metadata store path.
pub fn default_db_path() -> PathBuf {
    data_dir().join("kv_cache.db")
}

/// Default directory for pool snapshots.
pub fn default_persist_dir() -> PathBuf {
    data_dir().join("kv_persist")
}

/// Directory backing named shared-memory objects. `/dev/shm` gives true
/// RAM-backed segments on Linux; elsewhere the temp dir is a plain mmap.
pub fn default_shm_dir() -> PathBuf {
    let dev_shm = PathBuf::from("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm
    } else {
        std::env::temp_dir()
    }
}
