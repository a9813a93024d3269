//! Shared-memory KV cache: block allocator, segment layout, metadata
//! store, snapshots, and the manager façade that ties them together.

pub mod allocator;
pub mod entry;
pub mod manager;
pub mod metadata;
pub mod persist;
pub mod segment;

pub use allocator::{BitmapAllocator, BlockRange};
pub use entry::{CacheEntry, CacheStats};
pub use manager::{CacheError, CacheManager, PoolHealth, PoolStatus, PutOptions};
pub use metadata::MetadataStore;
pub use persist::PoolSnapshot;
pub use segment::SharedSegment;
