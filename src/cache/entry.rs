//! Cache entry and pool statistics records.

use serde::{Deserialize, Serialize};

use crate::config::CachePolicy;

/// Metadata for a single cached payload.
///
/// The payload bytes themselves live in the pool's shared segment at
/// `[offset, offset + size_bytes)`; this record is what the metadata
/// store indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Caller-assigned key, unique within a pool.
    pub sequence_id: u64,

    /// Truncated digest over the caller's prefix tokens, empty when none
    /// were supplied.
    pub prefix_hash: String,

    /// Creation time, seconds since the Unix epoch.
    pub created_at: f64,

    /// Last access time, seconds since the Unix epoch.
    pub last_accessed: f64,

    /// Number of accesses, starting at 1 on insert.
    pub access_count: u64,

    /// Caller-defined logical size (e.g. tokens represented).
    pub token_count: u64,

    /// Physical payload length in bytes.
    pub size_bytes: u64,

    /// Absolute byte offset of the payload within the segment.
    pub offset: u64,

    /// Caller weight; only the priority policy consults it.
    pub priority: i64,

    /// Opaque caller annotation blob. No schema is enforced.
    #[serde(default)]
    pub metadata: Option<Vec<u8>>,
}

/// Point-in-time snapshot of one pool's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub entry_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    /// hits / (hits + misses), 0.0 before any access.
    pub hit_rate: f64,
    pub eviction_count: u64,
    pub attached_processes: u32,
    pub created_at: f64,
    pub last_modified: f64,
    pub policy: CachePolicy,
}

/// Derive a hit rate, returning 0.0 when there have been no accesses.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Current wall-clock time as seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(hit_rate(0, 0), 0.0);
        assert_eq!(hit_rate(3, 1), 0.75);
        assert_eq!(hit_rate(0, 5), 0.0);
    }
}
