//! Cache manager: the façade over metadata store and shared segments.
//!
//! One manager instance coordinates a single metadata store with however
//! many pools this process currently has attached. Per-pool client state
//! machine: UNATTACHED → ATTACHED (create_pool/attach_pool) → DETACHED
//! (detach_pool; the segment persists) → DESTROYED (destroy_pool unlinks
//! the segment, drops the rows, and removes the default snapshot).
//!
//! Hot-path operations (`put`/`get`/`delete`) never return errors for a
//! miss or a failed allocation; those are expected outcomes. Lifecycle
//! and persistence operations surface their errors.
//!
//! Threads sharing one manager are safe: the pool map, the allocator
//! bitmaps, and the store connection are each mutex-guarded. Processes
//! sharing one pool are not mutually excluded — see the segment module
//! docs for the single-writer-per-pool assumption.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::entry::{hit_rate, now_secs, CacheEntry, CacheStats};
use crate::cache::metadata::{MetadataError, MetadataStore};
use crate::cache::persist::{PersistError, PoolSnapshot, SnapshotEntry};
use crate::cache::segment::{SegmentError, SharedSegment};
use crate::config::{self, CacheConfig, CachePolicy, CacheTier, ConfigError};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("Pool {0:?} not found")]
    PoolNotFound(String),

    #[error("Failed to create pool {0:?}")]
    PoolCreate(String),
}

/// Compute the prefix digest for a token sequence: the first 16 hex
/// characters of SHA-256 over the tokens packed as little-endian u32.
/// Empty input yields the empty string (no prefix).
pub fn prefix_hash(tokens: &[u32]) -> String {
    if tokens.is_empty() {
        return String::new();
    }
    let mut packed = Vec::with_capacity(tokens.len() * 4);
    for t in tokens {
        packed.extend_from_slice(&t.to_le_bytes());
    }
    let digest = Sha256::digest(&packed);
    hex::encode(digest)[..16].to_string()
}

/// One row of `status` output.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub name: String,
    pub size_bytes: u64,
    pub policy: CachePolicy,
    pub tier: CacheTier,
    pub entry_count: u64,
    /// Bytes in use; None when the segment could not be attached and the
    /// store has no physical accounting.
    pub used_bytes: Option<u64>,
    pub hit_rate: f64,
    pub eviction_count: u64,
    /// Whether live segment stats back this row (vs. store approximation).
    pub live: bool,
}

/// Result of a `health` probe against one pool.
#[derive(Debug, Clone)]
pub struct PoolHealth {
    pub pool: String,
    pub shm_name: String,
    pub stats: CacheStats,
    pub attached_pids: Vec<u32>,
}

/// Options for a single `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions<'a> {
    /// Prefix tokens to derive the entry's prefix hash from.
    pub prefix_tokens: Option<&'a [u32]>,
    /// Caller weight for the priority policy.
    pub priority: i64,
    /// Opaque caller annotation stored with the entry.
    pub metadata: Option<&'a [u8]>,
}

/// The process-wide cache manager.
///
/// Explicit constructor, explicit [`cleanup`](Self::cleanup) teardown;
/// pass it by reference to collaborators rather than making it a global.
pub struct CacheManager {
    store: MetadataStore,
    pools: Mutex<HashMap<String, SharedSegment>>,
    persist_dir: PathBuf,
    shm_dir: PathBuf,
    pid: u32,
}

impl CacheManager {
    /// Open a manager on the default data directory (`~/.cortex`).
    pub fn new() -> Result<Self, CacheError> {
        Self::with_paths(
            &config::default_db_path(),
            &config::default_persist_dir(),
            &config::default_shm_dir(),
        )
    }

    /// Open a manager with explicit store, snapshot, and shm locations.
    /// Tests use this to isolate every instance in a tempdir.
    pub fn with_paths(
        db_path: &Path,
        persist_dir: &Path,
        shm_dir: &Path,
    ) -> Result<Self, CacheError> {
        std::fs::create_dir_all(persist_dir).map_err(MetadataError::Io)?;
        std::fs::create_dir_all(shm_dir).map_err(MetadataError::Io)?;
        let store = MetadataStore::open(db_path)?;
        Ok(Self {
            store,
            pools: Mutex::new(HashMap::new()),
            persist_dir: persist_dir.to_path_buf(),
            shm_dir: shm_dir.to_path_buf(),
            pid: std::process::id(),
        })
    }

    /// Direct access to the metadata store (read-only reporting paths).
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    // ---- pool lifecycle ----

    /// Create a new pool: allocate the segment, write its header, and
    /// persist the config. Returns false (never panics) when the name is
    /// already attached, the config is invalid, or segment creation
    /// fails.
    pub fn create_pool(&self, config: &CacheConfig) -> bool {
        if let Err(e) = config.validate() {
            warn!(pool = %config.name, error = %e, "Rejecting pool config");
            return false;
        }

        let mut pools = self.pools.lock();
        if pools.contains_key(&config.name) {
            warn!(pool = %config.name, "Pool already exists");
            return false;
        }

        let segment = match SharedSegment::create(&self.shm_dir, config) {
            Ok(seg) => seg,
            Err(e) => {
                warn!(pool = %config.name, error = %e, "Failed to create pool segment");
                return false;
            }
        };

        if let Err(e) = self.store.save_pool(config, segment.name()) {
            warn!(pool = %config.name, error = %e, "Failed to record pool");
            return false;
        }
        if let Err(e) = self.store.add_attachment(&config.name, self.pid) {
            warn!(pool = %config.name, error = %e, "Failed to record attachment");
        }

        info!(
            pool = %config.name,
            size = config.size_bytes,
            policy = %config.policy,
            "Created cache pool"
        );
        pools.insert(config.name.clone(), segment);
        true
    }

    /// Attach to an existing pool. Ok(true) once attached (idempotent),
    /// Ok(false) when the store has no such pool or its segment is gone.
    /// A segment with a bad magic or wrong version is an error: corrupted
    /// or incompatible regions are never silently treated as valid.
    pub fn attach_pool(&self, name: &str) -> Result<bool, CacheError> {
        let mut pools = self.pools.lock();
        self.attach_locked(&mut pools, name)
    }

    fn attach_locked(
        &self,
        pools: &mut HashMap<String, SharedSegment>,
        name: &str,
    ) -> Result<bool, CacheError> {
        if pools.contains_key(name) {
            return Ok(true);
        }

        let Some((config, _)) = self.store.get_pool(name)? else {
            debug!(pool = name, "Pool not found in metadata store");
            return Ok(false);
        };

        match SharedSegment::attach(&self.shm_dir, name, config.block_size) {
            Ok(segment) => {
                self.store.add_attachment(name, self.pid)?;
                info!(pool = name, "Attached to pool");
                pools.insert(name.to_string(), segment);
                Ok(true)
            }
            Err(SegmentError::NotFound { .. }) => {
                warn!(pool = name, "Pool is recorded but its segment is gone");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Detach from a pool; the segment persists for other processes.
    /// Detaching a pool that is not attached is a no-op.
    pub fn detach_pool(&self, name: &str) -> bool {
        let mut pools = self.pools.lock();
        if let Some(mut segment) = pools.remove(name) {
            segment.close();
            if let Err(e) = self.store.remove_attachment(name, self.pid) {
                warn!(pool = name, error = %e, "Failed to remove attachment record");
            }
            info!(pool = name, "Detached from pool");
        }
        true
    }

    /// Destroy a pool completely: unlink the segment, remove all rows,
    /// and delete the default snapshot file. Irreversible.
    pub fn destroy_pool(&self, name: &str) -> Result<bool, CacheError> {
        let mut pools = self.pools.lock();
        let existed = self.store.get_pool(name)?.is_some() || pools.contains_key(name);

        if let Some(segment) = pools.remove(name) {
            segment.destroy()?;
        } else {
            SharedSegment::destroy_named(&self.shm_dir, name)?;
        }

        self.store.delete_pool(name)?;

        let snapshot = self.persist_dir.join(format!("{name}.cache"));
        match std::fs::remove_file(&snapshot) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::Metadata(MetadataError::Io(e))),
        }

        info!(pool = name, "Destroyed pool");
        Ok(existed)
    }

    // ---- entry operations ----

    /// Store a payload under `sequence_id`, auto-attaching the pool.
    ///
    /// Returns false when the pool cannot be attached or no contiguous
    /// space exists even after one eviction retry. Writing under an
    /// existing sequence_id replaces the metadata row without freeing the
    /// old byte range; callers must `delete` first to reclaim it.
    pub fn put(
        &self,
        pool: &str,
        sequence_id: u64,
        data: &[u8],
        token_count: u64,
        opts: PutOptions<'_>,
    ) -> bool {
        let hash = opts.prefix_tokens.map(prefix_hash).unwrap_or_default();
        match self.try_put(pool, sequence_id, data, token_count, hash, &opts) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(pool, sequence_id, error = %e, "put failed");
                false
            }
        }
    }

    fn try_put(
        &self,
        pool: &str,
        sequence_id: u64,
        data: &[u8],
        token_count: u64,
        hash: String,
        opts: &PutOptions<'_>,
    ) -> Result<bool, CacheError> {
        let mut pools = self.pools.lock();
        if !self.attach_locked(&mut pools, pool)? {
            return Ok(false);
        }
        let Some((config, _)) = self.store.get_pool(pool)? else {
            return Ok(false);
        };

        // Soft entry-count ceiling: make room before inserting.
        if self.store.count_entries(pool)? >= config.max_sequences {
            self.evict_candidates(&mut pools, pool, config.policy, 1)?;
        }

        self.put_at(
            &mut pools,
            pool,
            &config,
            sequence_id,
            data,
            token_count,
            hash,
            opts.priority,
            opts.metadata.map(<[u8]>::to_vec),
        )
    }

    /// Allocate, write, and index one payload. Shared by put and restore
    /// so restored entries obey the same eviction/allocation rules.
    #[allow(clippy::too_many_arguments)]
    fn put_at(
        &self,
        pools: &mut HashMap<String, SharedSegment>,
        pool: &str,
        config: &CacheConfig,
        sequence_id: u64,
        data: &[u8],
        token_count: u64,
        prefix_hash: String,
        priority: i64,
        metadata: Option<Vec<u8>>,
    ) -> Result<bool, CacheError> {
        fn alloc(
            pools: &mut HashMap<String, SharedSegment>,
            pool: &str,
            len: usize,
        ) -> Option<u64> {
            pools.get_mut(pool).and_then(|seg| seg.allocate(len))
        }

        let offset = match alloc(pools, pool, data.len()) {
            Some(offset) => offset,
            None => {
                // Free roughly enough blocks for the payload and retry once.
                let to_evict = (data.len() as u64 / config.block_size + 1) as usize;
                let evicted = self.evict_candidates(pools, pool, config.policy, to_evict)?;
                debug!(pool, evicted, "Evicted to make room");
                match alloc(pools, pool, data.len()) {
                    Some(offset) => offset,
                    None => {
                        warn!(
                            pool,
                            sequence_id,
                            size = data.len(),
                            "Allocation failed after eviction retry"
                        );
                        return Ok(false);
                    }
                }
            }
        };

        let Some(segment) = pools.get_mut(pool) else {
            return Ok(false);
        };
        segment.write(offset, data)?;

        let now = now_secs();
        let entry = CacheEntry {
            sequence_id,
            prefix_hash,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            token_count,
            size_bytes: data.len() as u64,
            offset,
            priority,
            metadata,
        };
        self.store.save_entry(pool, &entry)?;

        let count = self.store.count_entries(pool)?;
        segment.set_entry_count(count);

        debug!(pool, sequence_id, size = data.len(), offset, "Stored entry");
        Ok(true)
    }

    /// Retrieve a payload, recording a hit or miss in both the segment
    /// header and the stats table. A pool that cannot be attached counts
    /// as a miss.
    pub fn get(&self, pool: &str, sequence_id: u64) -> Option<Vec<u8>> {
        match self.try_get(pool, sequence_id) {
            Ok(data) => data,
            Err(e) => {
                warn!(pool, sequence_id, error = %e, "get failed");
                let _ = self.store.increment_misses(pool);
                None
            }
        }
    }

    fn try_get(&self, pool: &str, sequence_id: u64) -> Result<Option<Vec<u8>>, CacheError> {
        let mut pools = self.pools.lock();
        if !self.attach_locked(&mut pools, pool)? {
            let _ = self.store.increment_misses(pool);
            return Ok(None);
        }

        let Some(entry) = self.store.get_entry(pool, sequence_id)? else {
            if let Some(segment) = pools.get_mut(pool) {
                segment.record_miss();
            }
            self.store.increment_misses(pool)?;
            return Ok(None);
        };

        self.store.update_access(pool, sequence_id)?;
        self.store.increment_hits(pool)?;

        let Some(segment) = pools.get_mut(pool) else {
            return Ok(None);
        };
        segment.record_hit();
        let data = segment.read(entry.offset, entry.size_bytes as usize)?;
        Ok(Some(data))
    }

    /// All entries whose prefix hash matches the digest of `tokens`,
    /// with their payloads. Bumps last_accessed per match; records one
    /// hit if anything matched, one miss otherwise.
    pub fn get_by_prefix(&self, pool: &str, tokens: &[u32]) -> Vec<(CacheEntry, Vec<u8>)> {
        match self.try_get_by_prefix(pool, tokens) {
            Ok(results) => results,
            Err(e) => {
                warn!(pool, error = %e, "get_by_prefix failed");
                Vec::new()
            }
        }
    }

    fn try_get_by_prefix(
        &self,
        pool: &str,
        tokens: &[u32],
    ) -> Result<Vec<(CacheEntry, Vec<u8>)>, CacheError> {
        let mut pools = self.pools.lock();
        if !self.attach_locked(&mut pools, pool)? {
            return Ok(Vec::new());
        }

        let hash = prefix_hash(tokens);
        let entries = self.store.entries_by_prefix(pool, &hash)?;

        let Some(segment) = pools.get_mut(pool) else {
            return Ok(Vec::new());
        };

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let data = segment.read(entry.offset, entry.size_bytes as usize)?;
            self.store.update_access(pool, entry.sequence_id)?;
            results.push((entry, data));
        }

        if results.is_empty() {
            segment.record_miss();
            self.store.increment_misses(pool)?;
        } else {
            segment.record_hit();
            self.store.increment_hits(pool)?;
        }
        Ok(results)
    }

    /// Remove an entry, freeing its byte range. False when absent.
    pub fn delete(&self, pool: &str, sequence_id: u64) -> bool {
        match self.try_delete(pool, sequence_id) {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(pool, sequence_id, error = %e, "delete failed");
                false
            }
        }
    }

    fn try_delete(&self, pool: &str, sequence_id: u64) -> Result<bool, CacheError> {
        let mut pools = self.pools.lock();
        if !self.attach_locked(&mut pools, pool)? {
            return Ok(false);
        }
        let Some(entry) = self.store.get_entry(pool, sequence_id)? else {
            return Ok(false);
        };

        if let Some(segment) = pools.get_mut(pool) {
            segment.free(entry.offset, entry.size_bytes as usize);
        }
        self.store.delete_entry(pool, sequence_id)?;

        let count = self.store.count_entries(pool)?;
        if let Some(segment) = pools.get_mut(pool) {
            segment.set_entry_count(count);
        }
        debug!(pool, sequence_id, "Deleted entry");
        Ok(true)
    }

    // ---- eviction ----

    /// Evict a percentage of live entries (default policy order).
    /// Returns the number actually evicted.
    pub fn evict(&self, pool: &str, percent: f64) -> usize {
        match self.try_evict(pool, percent) {
            Ok(n) => n,
            Err(e) => {
                warn!(pool, error = %e, "evict failed");
                0
            }
        }
    }

    fn try_evict(&self, pool: &str, percent: f64) -> Result<usize, CacheError> {
        let Some((config, _)) = self.store.get_pool(pool)? else {
            warn!(pool, "Pool not found");
            return Ok(0);
        };

        let live = self.store.count_entries(pool)?;
        if live == 0 {
            return Ok(0);
        }
        let count = (live as f64 * percent / 100.0).ceil() as usize;

        let mut pools = self.pools.lock();
        if !self.attach_locked(&mut pools, pool)? {
            return Ok(0);
        }
        let evicted = self.evict_candidates(&mut pools, pool, config.policy, count)?;
        info!(pool, evicted, "Manual eviction complete");
        Ok(evicted)
    }

    /// Evict up to `count` policy-ordered candidates: free each entry's
    /// byte range, drop its row, and bump the eviction counter.
    fn evict_candidates(
        &self,
        pools: &mut HashMap<String, SharedSegment>,
        pool: &str,
        policy: CachePolicy,
        count: usize,
    ) -> Result<usize, CacheError> {
        let candidates = self.store.get_eviction_candidates(pool, policy, count)?;
        let mut evicted = 0u64;

        for entry in candidates {
            if let Some(segment) = pools.get_mut(pool) {
                segment.free(entry.offset, entry.size_bytes as usize);
            }
            self.store.delete_entry(pool, entry.sequence_id)?;
            evicted += 1;
            debug!(
                pool,
                sequence_id = entry.sequence_id,
                policy = %policy,
                "Evicted entry"
            );
        }

        if evicted > 0 {
            self.store.increment_evictions(pool, evicted)?;
            let count = self.store.count_entries(pool)?;
            if let Some(segment) = pools.get_mut(pool) {
                segment.set_entry_count(count);
            }
        }
        Ok(evicted as usize)
    }

    // ---- persistence ----

    fn snapshot_path(&self, pool: &str, explicit: Option<&Path>) -> Result<PathBuf, CacheError> {
        if let Some(p) = explicit {
            return Ok(p.to_path_buf());
        }
        if let Some((config, _)) = self.store.get_pool(pool)? {
            if let Some(p) = config.persist_path {
                return Ok(p);
            }
        }
        Ok(self.persist_dir.join(format!("{pool}.cache")))
    }

    /// Serialize the pool (config, entries, payload bytes) to one
    /// snapshot file. Errors are raised: silent data loss on an explicit
    /// operator action is unacceptable.
    pub fn persist(&self, pool: &str, path: Option<&Path>) -> Result<PathBuf, CacheError> {
        let target = self.snapshot_path(pool, path)?;

        let mut pools = self.pools.lock();
        if !self.attach_locked(&mut pools, pool)? {
            return Err(CacheError::PoolNotFound(pool.to_string()));
        }
        let Some((config, _)) = self.store.get_pool(pool)? else {
            return Err(CacheError::PoolNotFound(pool.to_string()));
        };

        let entries = self.store.list_entries(pool)?;
        let Some(segment) = pools.get(pool) else {
            return Err(CacheError::PoolNotFound(pool.to_string()));
        };

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let payload = segment.read(entry.offset, entry.size_bytes as usize)?;
            items.push(SnapshotEntry::new(entry, &payload));
        }

        let snapshot = PoolSnapshot::new(config, items);
        snapshot.save(&target)?;
        info!(
            pool,
            path = %target.display(),
            entries = snapshot.entries.len(),
            "Persisted pool"
        );
        Ok(target)
    }

    /// Rebuild a pool from a snapshot, creating it when needed. Entries
    /// are re-inserted through the normal put path, so an undersized
    /// target pool evicts or drops entries exactly as fresh writes would.
    /// Returns the number of entries restored.
    pub fn restore(&self, pool: &str, path: Option<&Path>) -> Result<usize, CacheError> {
        let source = self.snapshot_path(pool, path)?;
        let snapshot = PoolSnapshot::load(&source)?;

        // The snapshot's embedded config may carry another pool's name;
        // the target name wins.
        let mut config = snapshot.config.clone();
        config.name = pool.to_string();

        let attached = self.pools.lock().contains_key(pool);
        if !attached && !self.attach_pool(pool)? && !self.create_pool(&config) {
            return Err(CacheError::PoolCreate(pool.to_string()));
        }

        let mut pools = self.pools.lock();
        let Some((config, _)) = self.store.get_pool(pool)? else {
            return Err(CacheError::PoolNotFound(pool.to_string()));
        };

        let mut restored = 0;
        for item in &snapshot.entries {
            let payload = item.payload()?;
            let entry = &item.entry;

            if self.store.count_entries(pool)? >= config.max_sequences {
                self.evict_candidates(&mut pools, pool, config.policy, 1)?;
            }

            let stored = self.put_at(
                &mut pools,
                pool,
                &config,
                entry.sequence_id,
                &payload,
                entry.token_count,
                entry.prefix_hash.clone(),
                entry.priority,
                entry.metadata.clone(),
            )?;
            if stored {
                restored += 1;
            }
        }

        info!(
            pool,
            restored,
            total = snapshot.entries.len(),
            path = %source.display(),
            "Restored pool"
        );
        Ok(restored)
    }

    // ---- reporting ----

    /// Status rows for one pool or all pools: live segment stats where a
    /// segment can be attached, store-only approximations otherwise.
    pub fn status(&self, pool: Option<&str>) -> Result<Vec<PoolStatus>, CacheError> {
        let configs = match pool {
            Some(name) => match self.store.get_pool(name)? {
                Some((config, _)) => vec![config],
                None => return Err(CacheError::PoolNotFound(name.to_string())),
            },
            None => self.store.list_pools()?,
        };

        let mut rows = Vec::with_capacity(configs.len());
        let mut pools = self.pools.lock();
        for config in configs {
            let counters = self.store.counters(&config.name)?.unwrap_or_default();

            let live = matches!(
                self.attach_locked(&mut pools, &config.name),
                Ok(true)
            );
            let row = if let Some(segment) = live.then(|| pools.get(&config.name)).flatten() {
                let stats = segment.stats();
                PoolStatus {
                    name: config.name.clone(),
                    size_bytes: config.size_bytes,
                    policy: config.policy,
                    tier: config.tier,
                    entry_count: stats.entry_count,
                    used_bytes: Some(stats.used_bytes),
                    hit_rate: stats.hit_rate,
                    eviction_count: counters.evictions,
                    live: true,
                }
            } else {
                PoolStatus {
                    name: config.name.clone(),
                    size_bytes: config.size_bytes,
                    policy: config.policy,
                    tier: config.tier,
                    entry_count: self.store.count_entries(&config.name)?,
                    used_bytes: None,
                    hit_rate: hit_rate(counters.hits, counters.misses),
                    eviction_count: counters.evictions,
                    live: false,
                }
            };
            rows.push(row);
        }
        Ok(rows)
    }

    /// All entry metadata for a pool, straight from the store.
    pub fn list_entries(&self, pool: &str) -> Result<Vec<CacheEntry>, CacheError> {
        Ok(self.store.list_entries(pool)?)
    }

    /// Probe a pool: attach, read live stats, and report attachments.
    /// Failure to attach (or a corrupt segment) is the unhealthy case and
    /// surfaces as the underlying error.
    pub fn health(&self, pool: &str) -> Result<PoolHealth, CacheError> {
        let mut pools = self.pools.lock();
        if !self.attach_locked(&mut pools, pool)? {
            return Err(CacheError::PoolNotFound(pool.to_string()));
        }
        let Some(segment) = pools.get(pool) else {
            return Err(CacheError::PoolNotFound(pool.to_string()));
        };

        let counters = self.store.counters(pool)?.unwrap_or_default();
        let mut stats = segment.stats();
        stats.eviction_count = counters.evictions;

        Ok(PoolHealth {
            pool: pool.to_string(),
            shm_name: segment.name().to_string(),
            stats,
            attached_pids: self.store.get_attachments(pool)?,
        })
    }

    /// Detach every pool this instance attached. Call on process exit;
    /// dropping the manager does the same as a safety net.
    pub fn cleanup(&self) {
        let names: Vec<String> = self.pools.lock().keys().cloned().collect();
        for name in names {
            self.detach_pool(&name);
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}
