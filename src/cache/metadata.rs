//! Durable metadata index.
//!
//! A local SQLite database records which pools exist, every entry's
//! placement and access history, hit/miss/eviction counters, and which
//! processes are attached. Any process can discover and reattach pools
//! from here without re-deriving state from shared memory alone.
//!
//! Every write is a single immediately committed statement. Concurrent
//! writers racing on the same (pool, sequence_id) overwrite each other —
//! last writer wins. That is an accepted limitation of the store, not
//! something masked here.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::debug;

use crate::cache::entry::{now_secs, CacheEntry};
use crate::config::{CacheConfig, CachePolicy};

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Config serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-pool hit/miss/eviction counters from the stats table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolCounters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Handle to the metadata database.
///
/// The connection sits behind a mutex; SQLite serializes the rest.
pub struct MetadataStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pools (
        name TEXT PRIMARY KEY,
        config TEXT NOT NULL,
        shm_name TEXT,
        created_at REAL DEFAULT (strftime('%s', 'now')),
        last_modified REAL DEFAULT (strftime('%s', 'now'))
    );

    CREATE TABLE IF NOT EXISTS entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pool_name TEXT NOT NULL,
        sequence_id INTEGER NOT NULL,
        prefix_hash TEXT NOT NULL,
        created_at REAL NOT NULL,
        last_accessed REAL NOT NULL,
        access_count INTEGER DEFAULT 1,
        token_count INTEGER NOT NULL,
        size_bytes INTEGER NOT NULL,
        offset INTEGER NOT NULL,
        priority INTEGER DEFAULT 0,
        metadata BLOB,
        UNIQUE(pool_name, sequence_id),
        FOREIGN KEY(pool_name) REFERENCES pools(name)
    );

    CREATE TABLE IF NOT EXISTS stats (
        pool_name TEXT PRIMARY KEY,
        hits INTEGER DEFAULT 0,
        misses INTEGER DEFAULT 0,
        evictions INTEGER DEFAULT 0,
        FOREIGN KEY(pool_name) REFERENCES pools(name)
    );

    CREATE TABLE IF NOT EXISTS attachments (
        pool_name TEXT NOT NULL,
        pid INTEGER NOT NULL,
        attached_at REAL DEFAULT (strftime('%s', 'now')),
        PRIMARY KEY(pool_name, pid),
        FOREIGN KEY(pool_name) REFERENCES pools(name)
    );

    CREATE INDEX IF NOT EXISTS idx_entries_pool ON entries(pool_name);
    CREATE INDEX IF NOT EXISTS idx_entries_prefix ON entries(prefix_hash);
    CREATE INDEX IF NOT EXISTS idx_entries_accessed ON entries(last_accessed);
    CREATE INDEX IF NOT EXISTS idx_entries_count ON entries(access_count);
";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        sequence_id: row.get::<_, i64>("sequence_id")? as u64,
        prefix_hash: row.get("prefix_hash")?,
        created_at: row.get("created_at")?,
        last_accessed: row.get("last_accessed")?,
        access_count: row.get::<_, i64>("access_count")? as u64,
        token_count: row.get::<_, i64>("token_count")? as u64,
        size_bytes: row.get::<_, i64>("size_bytes")? as u64,
        offset: row.get::<_, i64>("offset")? as u64,
        priority: row.get("priority")?,
        metadata: row.get("metadata")?,
    })
}

impl MetadataStore {
    /// Open (creating if needed) the database at `path` and ensure the
    /// schema exists.
    pub fn open(path: &Path) -> Result<Self, MetadataError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "Opened metadata store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- pools ----

    /// Insert or replace a pool's config row and ensure its stats row.
    pub fn save_pool(&self, config: &CacheConfig, shm_name: &str) -> Result<(), MetadataError> {
        let json = serde_json::to_string(config)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO pools (name, config, shm_name, last_modified)
             VALUES (?1, ?2, ?3, ?4)",
            params![config.name, json, shm_name, now_secs()],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO stats (pool_name) VALUES (?1)",
            params![config.name],
        )?;
        Ok(())
    }

    /// Look up a pool's config and segment name.
    pub fn get_pool(&self, name: &str) -> Result<Option<(CacheConfig, String)>, MetadataError> {
        let conn = self.conn.lock();
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT config, shm_name FROM pools WHERE name = ?1",
                params![name],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        match row {
            Some((json, shm)) => {
                let config: CacheConfig = serde_json::from_str(&json)?;
                Ok(Some((config, shm.unwrap_or_default())))
            }
            None => Ok(None),
        }
    }

    /// All pool configs in the store.
    pub fn list_pools(&self) -> Result<Vec<CacheConfig>, MetadataError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT config FROM pools ORDER BY name")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut pools = Vec::new();
        for json in rows {
            pools.push(serde_json::from_str(&json?)?);
        }
        Ok(pools)
    }

    /// Remove a pool and all of its entries, stats, and attachments.
    pub fn delete_pool(&self, name: &str) -> Result<(), MetadataError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM entries WHERE pool_name = ?1", params![name])?;
        conn.execute("DELETE FROM stats WHERE pool_name = ?1", params![name])?;
        conn.execute(
            "DELETE FROM attachments WHERE pool_name = ?1",
            params![name],
        )?;
        conn.execute("DELETE FROM pools WHERE name = ?1", params![name])?;
        Ok(())
    }

    // ---- entries ----

    /// Insert or replace an entry row (last writer wins).
    pub fn save_entry(&self, pool: &str, entry: &CacheEntry) -> Result<(), MetadataError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO entries
             (pool_name, sequence_id, prefix_hash, created_at, last_accessed,
              access_count, token_count, size_bytes, offset, priority, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                pool,
                entry.sequence_id as i64,
                entry.prefix_hash,
                entry.created_at,
                entry.last_accessed,
                entry.access_count as i64,
                entry.token_count as i64,
                entry.size_bytes as i64,
                entry.offset as i64,
                entry.priority,
                entry.metadata,
            ],
        )?;
        Ok(())
    }

    /// Fetch one entry by key.
    pub fn get_entry(
        &self,
        pool: &str,
        sequence_id: u64,
    ) -> Result<Option<CacheEntry>, MetadataError> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                "SELECT * FROM entries WHERE pool_name = ?1 AND sequence_id = ?2",
                params![pool, sequence_id as i64],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// All entries whose prefix hash matches.
    pub fn entries_by_prefix(
        &self,
        pool: &str,
        prefix_hash: &str,
    ) -> Result<Vec<CacheEntry>, MetadataError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM entries WHERE pool_name = ?1 AND prefix_hash = ?2
             ORDER BY sequence_id",
        )?;
        let rows = stmt.query_map(params![pool, prefix_hash], entry_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// All entries in a pool.
    pub fn list_entries(&self, pool: &str) -> Result<Vec<CacheEntry>, MetadataError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM entries WHERE pool_name = ?1 ORDER BY sequence_id")?;
        let rows = stmt.query_map(params![pool], entry_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Live entry count for a pool.
    pub fn count_entries(&self, pool: &str) -> Result<u64, MetadataError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE pool_name = ?1",
            params![pool],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    /// Delete one entry; false when it was not present.
    pub fn delete_entry(&self, pool: &str, sequence_id: u64) -> Result<bool, MetadataError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM entries WHERE pool_name = ?1 AND sequence_id = ?2",
            params![pool, sequence_id as i64],
        )?;
        Ok(changed > 0)
    }

    /// Bump last_accessed to now and access_count by one.
    pub fn update_access(&self, pool: &str, sequence_id: u64) -> Result<(), MetadataError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE entries SET last_accessed = ?1, access_count = access_count + 1
             WHERE pool_name = ?2 AND sequence_id = ?3",
            params![now_secs(), pool, sequence_id as i64],
        )?;
        Ok(())
    }

    /// Up to `count` entries ordered worst-first for the given policy.
    pub fn get_eviction_candidates(
        &self,
        pool: &str,
        policy: CachePolicy,
        count: usize,
    ) -> Result<Vec<CacheEntry>, MetadataError> {
        let order = match policy {
            CachePolicy::Lru => "last_accessed ASC",
            CachePolicy::Lfu => "access_count ASC",
            CachePolicy::Fifo => "created_at ASC",
            CachePolicy::Priority => "priority ASC, last_accessed ASC",
        };
        let sql = format!(
            "SELECT * FROM entries WHERE pool_name = ?1 ORDER BY {order} LIMIT ?2"
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pool, count as i64], entry_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    // ---- counters ----

    /// Current hit/miss/eviction counters for a pool.
    pub fn counters(&self, pool: &str) -> Result<Option<PoolCounters>, MetadataError> {
        let conn = self.conn.lock();
        let counters = conn
            .query_row(
                "SELECT hits, misses, evictions FROM stats WHERE pool_name = ?1",
                params![pool],
                |r| {
                    Ok(PoolCounters {
                        hits: r.get::<_, i64>(0)? as u64,
                        misses: r.get::<_, i64>(1)? as u64,
                        evictions: r.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(counters)
    }

    pub fn increment_hits(&self, pool: &str) -> Result<(), MetadataError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE stats SET hits = hits + 1 WHERE pool_name = ?1",
            params![pool],
        )?;
        Ok(())
    }

    pub fn increment_misses(&self, pool: &str) -> Result<(), MetadataError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE stats SET misses = misses + 1 WHERE pool_name = ?1",
            params![pool],
        )?;
        Ok(())
    }

    pub fn increment_evictions(&self, pool: &str, count: u64) -> Result<(), MetadataError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE stats SET evictions = evictions + ?1 WHERE pool_name = ?2",
            params![count as i64, pool],
        )?;
        Ok(())
    }

    // ---- attachments ----

    /// Record that `pid` is attached to a pool.
    pub fn add_attachment(&self, pool: &str, pid: u32) -> Result<(), MetadataError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO attachments (pool_name, pid, attached_at)
             VALUES (?1, ?2, ?3)",
            params![pool, pid, now_secs()],
        )?;
        Ok(())
    }

    /// Drop the attachment record for `pid`.
    pub fn remove_attachment(&self, pool: &str, pid: u32) -> Result<(), MetadataError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM attachments WHERE pool_name = ?1 AND pid = ?2",
            params![pool, pid],
        )?;
        Ok(())
    }

    /// PIDs currently recorded as attached.
    pub fn get_attachments(&self, pool: &str) -> Result<Vec<u32>, MetadataError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT pid FROM attachments WHERE pool_name = ?1 ORDER BY pid")?;
        let rows = stmt.query_map(params![pool], |r| r.get::<_, u32>(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}
