//! User-space KV-cache manager over shared memory.
//!
//! Cached payloads live in named shared-memory pools (files under
//! `/dev/shm`, mapped by every attached process) carved into fixed-size
//! blocks by a first-fit bitmap allocator. Entry metadata, pool configs,
//! access statistics, and attachment records live in a SQLite database
//! so they survive process exits independently of the segments.
//!
//! The entry point is [`cache::CacheManager`]:
//!
//! ```no_run
//! use cortex_kv_cache::cache::{CacheManager, PutOptions};
//! use cortex_kv_cache::config::CacheConfig;
//!
//! let manager = CacheManager::new()?;
//! manager.create_pool(&CacheConfig::new("demo", 64 * 1024 * 1024));
//! manager.put("demo", 1, b"kv bytes", 128, PutOptions::default());
//! assert_eq!(manager.get("demo", 1).as_deref(), Some(&b"kv bytes"[..]));
//! manager.cleanup();
//! # Ok::<(), cortex_kv_cache::cache::CacheError>(())
//! ```

pub mod cache;
pub mod config;

pub use cache::{CacheEntry, CacheError, CacheManager, CacheStats, PutOptions};
pub use config::{parse_size, CacheConfig, CachePolicy, CacheTier};
