//! Benchmarks for the bitmap allocator and the put/get hot path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use cortex_kv_cache::cache::allocator::BitmapAllocator;
use cortex_kv_cache::cache::{CacheManager, PutOptions};
use cortex_kv_cache::config::CacheConfig;

fn bench_allocator(c: &mut Criterion) {
    c.bench_function("allocator_alloc_free_cycle", |b| {
        let alloc = BitmapAllocator::new(4096);
        b.iter(|| {
            let range = alloc.allocate(black_box(4)).unwrap();
            alloc.free(range);
        });
    });

    c.bench_function("allocator_fragmented_first_fit", |b| {
        let alloc = BitmapAllocator::new(4096);
        // Leave every other 4-block range allocated.
        let mut held = Vec::new();
        for i in 0..512 {
            let range = alloc.allocate(4).unwrap();
            if i % 2 == 0 {
                held.push(range);
            } else {
                alloc.free(range);
            }
        }
        b.iter(|| {
            let range = alloc.allocate(black_box(4)).unwrap();
            alloc.free(range);
        });
    });
}

fn bench_put_get(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let mgr = CacheManager::with_paths(
        &tmp.path().join("kv_cache.db"),
        &tmp.path().join("persist"),
        &tmp.path().join("shm"),
    )
    .unwrap();
    assert!(mgr.create_pool(&CacheConfig::new("bench", 4096 * 4096)));

    let payload = vec![0xA5u8; 16 * 1024];

    c.bench_function("put_16k", |b| {
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            // Delete first so repeated ids do not leak segment space.
            mgr.delete("bench", id);
            assert!(mgr.put("bench", id, &payload, 128, PutOptions::default()));
        });
    });

    assert!(mgr.put("bench", 0, &payload, 128, PutOptions::default()));
    c.bench_function("get_16k", |b| {
        b.iter(|| {
            let data = mgr.get("bench", black_box(0)).unwrap();
            black_box(data);
        });
    });
}

criterion_group!(benches, bench_allocator, bench_put_get);
criterion_main!(benches);
