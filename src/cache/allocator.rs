//! Bitmap block allocator.
//!
//! Tracks free/used state for a fixed number of equally sized blocks and
//! hands out contiguous runs with a deterministic first-fit scan. The
//! bitmap doubles as the segment's on-disk free list: [`to_bytes`] and
//! [`load_bytes`] mirror it into and out of the shared-memory free-list
//! region.
//!
//! There is no compaction; long-lived pools with mixed entry sizes can
//! fragment.
//!
//! [`to_bytes`]: BitmapAllocator::to_bytes
//! [`load_bytes`]: BitmapAllocator::load_bytes

use parking_lot::Mutex;

/// A contiguous run of allocation blocks.
///
/// Keeps block indices distinct from byte offsets; conversion between the
/// two happens only at the segment boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    /// Index of the first block in the run.
    pub start: usize,
    /// Number of blocks in the run.
    pub count: usize,
}

impl BlockRange {
    /// One-past-the-end block index.
    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

/// Thread-safe first-fit bitmap allocator.
#[derive(Debug)]
pub struct BitmapAllocator {
    block_count: usize,
    bitmap: Mutex<Vec<u8>>,
}

impl BitmapAllocator {
    /// Create an allocator with every block free.
    pub fn new(block_count: usize) -> Self {
        let bitmap_len = block_count.div_ceil(8);
        Self {
            block_count,
            bitmap: Mutex::new(vec![0u8; bitmap_len]),
        }
    }

    /// Total number of blocks tracked.
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Allocate `blocks_needed` consecutive free blocks.
    ///
    /// First-fit: the lowest-addressed run that fits wins. Returns `None`
    /// when no contiguous run exists (the caller decides whether to evict
    /// and retry). Zero-block requests are rejected.
    pub fn allocate(&self, blocks_needed: usize) -> Option<BlockRange> {
        if blocks_needed == 0 || blocks_needed > self.block_count {
            return None;
        }

        let mut bitmap = self.bitmap.lock();
        let mut consecutive = 0;
        let mut start = 0;

        for i in 0..self.block_count {
            if bitmap[i / 8] & (1 << (i % 8)) == 0 {
                if consecutive == 0 {
                    start = i;
                }
                consecutive += 1;
                if consecutive == blocks_needed {
                    for j in start..start + blocks_needed {
                        bitmap[j / 8] |= 1 << (j % 8);
                    }
                    return Some(BlockRange {
                        start,
                        count: blocks_needed,
                    });
                }
            } else {
                consecutive = 0;
            }
        }

        None
    }

    /// Clear the bits for `range`.
    ///
    /// Idempotent; indices past the end of the bitmap are ignored.
    pub fn free(&self, range: BlockRange) {
        let mut bitmap = self.bitmap.lock();
        for i in range.start..range.end() {
            if i < self.block_count {
                bitmap[i / 8] &= !(1 << (i % 8));
            }
        }
    }

    /// Count free blocks. O(block_count).
    pub fn free_blocks(&self) -> usize {
        let bitmap = self.bitmap.lock();
        (0..self.block_count)
            .filter(|i| bitmap[i / 8] & (1 << (i % 8)) == 0)
            .count()
    }

    /// Count used blocks. O(block_count).
    pub fn used_blocks(&self) -> usize {
        self.block_count - self.free_blocks()
    }

    /// Serialize the bitmap for the segment free-list region.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bitmap.lock().clone()
    }

    /// Replace the bitmap from a free-list region read.
    ///
    /// Extra trailing bytes (the region is larger than the bitmap) are
    /// ignored.
    pub fn load_bytes(&self, data: &[u8]) {
        let mut bitmap = self.bitmap.lock();
        let len = bitmap.len();
        bitmap.copy_from_slice(&data[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fit_is_deterministic() {
        let alloc = BitmapAllocator::new(16);
        assert_eq!(alloc.allocate(4).unwrap().start, 0);
        assert_eq!(alloc.allocate(4).unwrap().start, 4);

        // Free the first run; the next fitting request reuses it.
        alloc.free(BlockRange { start: 0, count: 4 });
        assert_eq!(alloc.allocate(2).unwrap().start, 0);
    }

    #[test]
    fn test_conservation_invariant() {
        let alloc = BitmapAllocator::new(64);
        let mut held = Vec::new();

        for n in [1usize, 7, 3, 12, 1] {
            if let Some(r) = alloc.allocate(n) {
                held.push(r);
            }
            assert_eq!(alloc.used_blocks() + alloc.free_blocks(), 64);
        }
        for r in held {
            alloc.free(r);
            assert_eq!(alloc.used_blocks() + alloc.free_blocks(), 64);
        }
        assert_eq!(alloc.free_blocks(), 64);
    }

    #[test]
    fn test_allocations_never_overlap() {
        let alloc = BitmapAllocator::new(32);
        let mut seen = vec![false; 32];

        while let Some(r) = alloc.allocate(5) {
            for i in r.start..r.end() {
                assert!(!seen[i], "block {i} handed out twice");
                seen[i] = true;
            }
        }
        // 6 runs of 5 fit in 32 blocks.
        assert_eq!(seen.iter().filter(|&&b| b).count(), 30);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let alloc = BitmapAllocator::new(8);
        assert!(alloc.allocate(9).is_none());
        assert!(alloc.allocate(8).is_some());
        assert!(alloc.allocate(1).is_none());
    }

    #[test]
    fn test_fragmentation_blocks_large_runs() {
        let alloc = BitmapAllocator::new(8);
        let a = alloc.allocate(3).unwrap();
        let _b = alloc.allocate(3).unwrap();
        alloc.free(a);

        // 3 free at the front, 2 at the back, but no run of 4.
        assert_eq!(alloc.free_blocks(), 5);
        assert!(alloc.allocate(4).is_none());
        assert_eq!(alloc.allocate(3).unwrap().start, 0);
    }

    #[test]
    fn test_free_is_idempotent_and_bounded() {
        let alloc = BitmapAllocator::new(8);
        let r = alloc.allocate(4).unwrap();
        alloc.free(r);
        alloc.free(r);
        // Out-of-range indices are ignored.
        alloc.free(BlockRange {
            start: 100,
            count: 50,
        });
        assert_eq!(alloc.free_blocks(), 8);
    }

    #[test]
    fn test_zero_block_request_rejected() {
        let alloc = BitmapAllocator::new(8);
        assert!(alloc.allocate(0).is_none());
    }

    #[test]
    fn test_bitmap_roundtrip() {
        let alloc = BitmapAllocator::new(16);
        alloc.allocate(3);
        alloc.allocate(5);
        let snapshot = alloc.to_bytes();

        let mirror = BitmapAllocator::new(16);
        mirror.load_bytes(&snapshot);
        assert_eq!(mirror.used_blocks(), 8);
        // First free run in the mirror starts where the original left off.
        assert_eq!(mirror.allocate(2).unwrap().start, 8);
    }
}
