//! Pool snapshots on disk.
//!
//! One snapshot file holds a whole pool: its config, every entry's
//! metadata, and the raw payload bytes hex-encoded, as a single JSON
//! record `{version, config, entries: [{entry, data}], timestamp}`.
//! Restore feeds each payload back through the normal put path, so a
//! snapshot restored into an undersized pool is subject to the same
//! eviction and allocation rules as fresh writes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::entry::CacheEntry;
use crate::config::CacheConfig;

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Snapshot version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Payload hex decoding failed for sequence {sequence_id}: {source}")]
    BadPayload {
        sequence_id: u64,
        source: hex::FromHexError,
    },
}

/// One entry plus its hex-encoded payload bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub entry: CacheEntry,
    /// Raw payload, hex-encoded.
    pub data: String,
}

impl SnapshotEntry {
    pub fn new(entry: CacheEntry, payload: &[u8]) -> Self {
        Self {
            entry,
            data: hex::encode(payload),
        }
    }

    /// Decode the payload bytes.
    pub fn payload(&self) -> Result<Vec<u8>, PersistError> {
        hex::decode(&self.data).map_err(|source| PersistError::BadPayload {
            sequence_id: self.entry.sequence_id,
            source,
        })
    }
}

/// A serialized pool: config plus all entries and payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub version: u32,
    pub config: CacheConfig,
    pub entries: Vec<SnapshotEntry>,
    /// When the snapshot was taken, seconds since the Unix epoch.
    pub timestamp: f64,
}

impl PoolSnapshot {
    pub fn new(config: CacheConfig, entries: Vec<SnapshotEntry>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            config,
            entries,
            timestamp: crate::cache::entry::now_secs(),
        }
    }

    /// Write the snapshot to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        debug!(
            path = %path.display(),
            entries = self.entries.len(),
            "Wrote pool snapshot"
        );
        Ok(())
    }

    /// Load a snapshot from `path`, rejecting unknown format versions.
    pub fn load(path: &Path) -> Result<Self, PersistError> {
        let file = std::fs::File::open(path)?;
        let snapshot: PoolSnapshot = serde_json::from_reader(std::io::BufReader::new(file))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistError::VersionMismatch {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: u64) -> CacheEntry {
        CacheEntry {
            sequence_id: id,
            prefix_hash: "00ff".into(),
            created_at: 1.0,
            last_accessed: 2.0,
            access_count: 3,
            token_count: 4,
            size_bytes: 5,
            offset: 8192,
            priority: 0,
            metadata: Some(b"note".to_vec()),
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("demo.cache");

        let cfg = CacheConfig::new("demo", 16 * 4096);
        let entries = vec![
            SnapshotEntry::new(entry(1), &[0xDE, 0xAD, 0xBE, 0xEF]),
            SnapshotEntry::new(entry(2), &[]),
        ];
        PoolSnapshot::new(cfg, entries).save(&path).unwrap();

        let back = PoolSnapshot::load(&path).unwrap();
        assert_eq!(back.version, SNAPSHOT_VERSION);
        assert_eq!(back.config.name, "demo");
        assert_eq!(back.entries.len(), 2);
        assert_eq!(back.entries[0].payload().unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(back.entries[1].payload().unwrap().is_empty());
        assert_eq!(back.entries[0].entry.metadata.as_deref(), Some(&b"note"[..]));
    }

    #[test]
    fn test_snapshot_rejects_other_versions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("demo.cache");

        let mut snap = PoolSnapshot::new(CacheConfig::new("demo", 4096), Vec::new());
        snap.version = 9;
        let file = std::fs::File::create(&path).unwrap();
        serde_json::to_writer(file, &snap).unwrap();

        assert!(matches!(
            PoolSnapshot::load(&path),
            Err(PersistError::VersionMismatch { found: 9, .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            PoolSnapshot::load(&tmp.path().join("nope.cache")),
            Err(PersistError::Io(_))
        ));
    }
}
