//! Named shared-memory segments.
//!
//! One segment backs one pool. The region is a file under the shm
//! directory (`/dev/shm` on Linux) mapped read-write, laid out as:
//!
//! ```text
//! [0,    4096)  header (fixed little-endian layout, see PoolHeader)
//! [4096, 8192)  free-list bitmap (one bit per block)
//! [8192, 8192 + data_size)  data region, sliced into block_size blocks
//! ```
//!
//! The header layout is bit-exact across implementations; a mismatched
//! magic or version on attach is refused rather than reinterpreted.
//!
//! After every allocate/free the local bitmap is serialized back into the
//! free-list region and the used/free header fields are updated. That
//! write-back is the only cross-process synchronization point: another
//! attached process must call [`SharedSegment::refresh_free_list`] before
//! trusting its own mirror. Two processes allocating concurrently from
//! one pool can still race; single writer per pool is the documented
//! operating assumption.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};
use memmap2::MmapMut;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::allocator::{BitmapAllocator, BlockRange};
use crate::cache::entry::{hit_rate, now_secs, CacheStats};
use crate::config::{CacheConfig, CachePolicy};

/// Prefix for shared-memory object names: pool "demo" → `cortex_kv_demo`.
pub const SHM_PREFIX: &str = "cortex_kv_";

/// Size of the header region in bytes.
pub const HEADER_SIZE: usize = 4096;

/// Size of the free-list bitmap region in bytes.
pub const FREE_LIST_SIZE: usize = 4096;

/// Byte offset where the data region begins.
pub const DATA_OFFSET: u64 = (HEADER_SIZE + FREE_LIST_SIZE) as u64;

/// Header magic, "KVCA".
pub const MAGIC: u32 = 0x4B56_4341;

/// Segment format version.
pub const FORMAT_VERSION: u32 = 1;

/// Encoded header length; the rest of the header region is reserved.
pub const HEADER_ENCODED_LEN: usize = 85;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Segment {name:?} not found")]
    NotFound { name: String },

    #[error("Invalid pool segment {name:?}: bad magic {magic:#010x}")]
    InvalidPool { name: String, magic: u32 },

    #[error("Segment version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Out-of-bounds access: offset {offset} + len {len} exceeds segment size {size}")]
    OutOfBounds { offset: u64, len: usize, size: u64 },

    #[error("Pool needs {blocks} blocks but the free list holds at most {capacity}")]
    FreeListOverflow { blocks: u64, capacity: u64 },
}

/// The fixed binary header at the front of every segment.
///
/// All integers little-endian. Field order and byte offsets are part of
/// the cross-process format: magic u32 @0, version u32 @4, data_size u64
/// @8, used u64 @16, free u64 @24, block_count u64 @32, entry_count u64
/// @40, hits u64 @48, misses u64 @56, created f64 @64, modified f64 @72,
/// policy u8 @80, attached_processes u32 @81.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolHeader {
    pub magic: u32,
    pub version: u32,
    pub data_size: u64,
    pub used: u64,
    pub free: u64,
    pub block_count: u64,
    pub entry_count: u64,
    pub hits: u64,
    pub misses: u64,
    pub created: f64,
    pub modified: f64,
    pub policy: u8,
    pub attached_processes: u32,
}

impl PoolHeader {
    /// Encode into the first [`HEADER_ENCODED_LEN`] bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) {
        let mut b = &mut buf[..HEADER_ENCODED_LEN];
        b.put_u32_le(self.magic);
        b.put_u32_le(self.version);
        b.put_u64_le(self.data_size);
        b.put_u64_le(self.used);
        b.put_u64_le(self.free);
        b.put_u64_le(self.block_count);
        b.put_u64_le(self.entry_count);
        b.put_u64_le(self.hits);
        b.put_u64_le(self.misses);
        b.put_f64_le(self.created);
        b.put_f64_le(self.modified);
        b.put_u8(self.policy);
        b.put_u32_le(self.attached_processes);
    }

    /// Decode from the front of a header region.
    pub fn decode(buf: &[u8]) -> Self {
        let mut b = &buf[..HEADER_ENCODED_LEN];
        Self {
            magic: b.get_u32_le(),
            version: b.get_u32_le(),
            data_size: b.get_u64_le(),
            used: b.get_u64_le(),
            free: b.get_u64_le(),
            block_count: b.get_u64_le(),
            entry_count: b.get_u64_le(),
            hits: b.get_u64_le(),
            misses: b.get_u64_le(),
            created: b.get_f64_le(),
            modified: b.get_f64_le(),
            policy: b.get_u8(),
            attached_processes: b.get_u32_le(),
        }
    }
}

/// Full object name for a pool's segment.
pub fn shm_name(pool: &str) -> String {
    format!("{SHM_PREFIX}{pool}")
}

/// A live mapping of one pool's shared-memory segment.
#[derive(Debug)]
pub struct SharedSegment {
    shm_name: String,
    path: PathBuf,
    block_size: u64,
    data_size: u64,
    allocator: BitmapAllocator,
    map: MmapMut,
    detached: bool,
}

impl SharedSegment {
    /// Create a new segment, unlinking any stale same-named one.
    ///
    /// The header is initialized with an all-free data region and
    /// `attached_processes = 1` for the creating process.
    pub fn create(shm_dir: &Path, config: &CacheConfig) -> Result<Self, SegmentError> {
        let block_count = config.block_count();
        let bitmap_capacity = (FREE_LIST_SIZE as u64) * 8;
        if block_count > bitmap_capacity {
            return Err(SegmentError::FreeListOverflow {
                blocks: block_count,
                capacity: bitmap_capacity,
            });
        }

        let shm_name = shm_name(&config.name);
        let path = shm_dir.join(&shm_name);

        // A leftover segment from a destroyed or crashed owner is stale;
        // creation always starts from a clean region.
        if path.exists() {
            warn!(name = %shm_name, "Removing stale segment before create");
            std::fs::remove_file(&path)?;
        }

        let total_size = DATA_OFFSET + config.size_bytes;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(total_size)?;

        // Safety: the mapping is private to this handle until the header
        // is fully written below; readers validate magic before use.
        let mut map = unsafe { MmapMut::map_mut(&file)? };

        let now = now_secs();
        let header = PoolHeader {
            magic: MAGIC,
            version: FORMAT_VERSION,
            data_size: config.size_bytes,
            used: 0,
            free: config.size_bytes,
            block_count,
            entry_count: 0,
            hits: 0,
            misses: 0,
            created: now,
            modified: now,
            policy: config.policy.as_u8(),
            attached_processes: 1,
        };
        header.encode(&mut map[..HEADER_SIZE]);

        let allocator = BitmapAllocator::new(block_count as usize);
        let bitmap = allocator.to_bytes();
        map[HEADER_SIZE..HEADER_SIZE + bitmap.len()].copy_from_slice(&bitmap);
        map.flush()?;

        debug!(
            name = %shm_name,
            size = config.size_bytes,
            blocks = block_count,
            "Created shared segment"
        );

        Ok(Self {
            shm_name,
            path,
            block_size: config.block_size,
            data_size: config.size_bytes,
            allocator,
            map,
            detached: false,
        })
    }

    /// Attach to an existing segment, validating magic and version and
    /// loading the free-list bitmap into the local allocator.
    pub fn attach(shm_dir: &Path, pool: &str, block_size: u64) -> Result<Self, SegmentError> {
        let shm_name = shm_name(pool);
        let path = shm_dir.join(&shm_name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SegmentError::NotFound {
                        name: shm_name.clone(),
                    }
                } else {
                    SegmentError::Io(e)
                }
            })?;

        // Safety: shared mapping of a segment file; the header checks
        // below refuse anything that is not one of ours.
        let mut map = unsafe { MmapMut::map_mut(&file)? };

        if map.len() < HEADER_SIZE + FREE_LIST_SIZE {
            return Err(SegmentError::InvalidPool {
                name: shm_name,
                magic: 0,
            });
        }

        let mut header = PoolHeader::decode(&map[..HEADER_SIZE]);
        if header.magic != MAGIC {
            return Err(SegmentError::InvalidPool {
                name: shm_name,
                magic: header.magic,
            });
        }
        if header.version != FORMAT_VERSION {
            return Err(SegmentError::VersionMismatch {
                found: header.version,
                expected: FORMAT_VERSION,
            });
        }
        // A valid magic does not guarantee a sane header; a block count
        // past the free-list capacity means corruption.
        let bitmap_capacity = (FREE_LIST_SIZE as u64) * 8;
        if header.block_count > bitmap_capacity {
            return Err(SegmentError::FreeListOverflow {
                blocks: header.block_count,
                capacity: bitmap_capacity,
            });
        }

        let allocator = BitmapAllocator::new(header.block_count as usize);
        allocator.load_bytes(&map[HEADER_SIZE..HEADER_SIZE + FREE_LIST_SIZE]);

        header.attached_processes += 1;
        header.modified = now_secs();
        header.encode(&mut map[..HEADER_SIZE]);

        debug!(
            name = %shm_name,
            attached = header.attached_processes,
            "Attached to shared segment"
        );

        Ok(Self {
            shm_name,
            path,
            block_size,
            data_size: header.data_size,
            allocator,
            map,
            detached: false,
        })
    }

    /// Object name of this segment (`cortex_kv_<pool>`).
    pub fn name(&self) -> &str {
        &self.shm_name
    }

    /// Decode the current header.
    pub fn header(&self) -> PoolHeader {
        PoolHeader::decode(&self.map[..HEADER_SIZE])
    }

    fn update_header(&mut self, f: impl FnOnce(&mut PoolHeader)) {
        let mut header = self.header();
        f(&mut header);
        header.modified = now_secs();
        header.encode(&mut self.map[..HEADER_SIZE]);
    }

    /// Allocate space for `size` bytes, returning the absolute byte
    /// offset of the payload within the segment.
    ///
    /// Sizes quantize up to whole blocks (minimum one, so even an empty
    /// payload owns a distinct range). Returns `None` when no contiguous
    /// run is free; the caller decides whether to evict and retry.
    pub fn allocate(&mut self, size: usize) -> Option<u64> {
        let blocks = (size as u64).div_ceil(self.block_size).max(1);
        let range = self.allocator.allocate(blocks as usize)?;
        self.sync_free_list();
        Some(DATA_OFFSET + range.start as u64 * self.block_size)
    }

    /// Free the range previously returned for `size` bytes at `offset`.
    pub fn free(&mut self, offset: u64, size: usize) {
        if offset < DATA_OFFSET {
            warn!(offset, "Ignoring free below the data region");
            return;
        }
        let start = ((offset - DATA_OFFSET) / self.block_size) as usize;
        let count = (size as u64).div_ceil(self.block_size).max(1) as usize;
        self.allocator.free(BlockRange { start, count });
        self.sync_free_list();
    }

    /// Serialize the bitmap into the free-list region and refresh the
    /// used/free header fields. Called after every allocate/free.
    fn sync_free_list(&mut self) {
        let bitmap = self.allocator.to_bytes();
        self.map[HEADER_SIZE..HEADER_SIZE + bitmap.len()].copy_from_slice(&bitmap);

        let used = self.allocator.used_blocks() as u64 * self.block_size;
        let free = self.data_size - used;
        self.update_header(|h| {
            h.used = used;
            h.free = free;
        });
    }

    /// Re-read the free-list region into the local allocator mirror.
    ///
    /// Callers sharing a pool with other writer processes must refresh
    /// before allocating; no push notification exists.
    pub fn refresh_free_list(&mut self) {
        let region = self.map[HEADER_SIZE..HEADER_SIZE + FREE_LIST_SIZE].to_vec();
        self.allocator.load_bytes(&region);
    }

    /// Read `size` bytes at an absolute segment offset.
    pub fn read(&self, offset: u64, size: usize) -> Result<Vec<u8>, SegmentError> {
        let end = offset + size as u64;
        if end > self.map.len() as u64 {
            return Err(SegmentError::OutOfBounds {
                offset,
                len: size,
                size: self.map.len() as u64,
            });
        }
        Ok(self.map[offset as usize..end as usize].to_vec())
    }

    /// Write bytes at an absolute segment offset.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), SegmentError> {
        let end = offset + data.len() as u64;
        if end > self.map.len() as u64 {
            return Err(SegmentError::OutOfBounds {
                offset,
                len: data.len(),
                size: self.map.len() as u64,
            });
        }
        self.map[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Compose a stats snapshot from the header.
    ///
    /// `eviction_count` is tracked in the metadata store, not the header;
    /// it is 0 here and overlaid by the manager.
    pub fn stats(&self) -> CacheStats {
        let h = self.header();
        CacheStats {
            total_bytes: h.data_size,
            used_bytes: h.used,
            free_bytes: h.free,
            entry_count: h.entry_count,
            hit_count: h.hits,
            miss_count: h.misses,
            hit_rate: hit_rate(h.hits, h.misses),
            eviction_count: 0,
            attached_processes: h.attached_processes,
            created_at: h.created,
            last_modified: h.modified,
            policy: CachePolicy::from_u8(h.policy),
        }
    }

    /// Bump the header hit counter.
    pub fn record_hit(&mut self) {
        self.update_header(|h| h.hits += 1);
    }

    /// Bump the header miss counter.
    pub fn record_miss(&mut self) {
        self.update_header(|h| h.misses += 1);
    }

    /// Update the live entry count in the header.
    pub fn set_entry_count(&mut self, count: u64) {
        self.update_header(|h| h.entry_count = count);
    }

    /// Detach: decrement the attached-process count and release the
    /// mapping. The segment itself persists.
    pub fn close(&mut self) {
        if self.detached {
            return;
        }
        self.update_header(|h| {
            h.attached_processes = h.attached_processes.saturating_sub(1);
        });
        if let Err(e) = self.map.flush() {
            warn!(name = %self.shm_name, error = %e, "Flush on close failed");
        }
        self.detached = true;
        debug!(name = %self.shm_name, "Detached from shared segment");
    }

    /// Unlink the segment from the OS. Irreversible.
    pub fn destroy(mut self) -> Result<(), SegmentError> {
        self.detached = true;
        std::fs::remove_file(&self.path)?;
        debug!(name = %self.shm_name, "Destroyed shared segment");
        Ok(())
    }

    /// Unlink a segment by pool name without attaching to it first.
    pub fn destroy_named(shm_dir: &Path, pool: &str) -> Result<(), SegmentError> {
        let path = shm_dir.join(shm_name(pool));
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SegmentError::Io(e)),
        }
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        self.close();
    }
}
