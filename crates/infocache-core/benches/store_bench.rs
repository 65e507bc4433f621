//! Hot-path benchmarks for the cache store
//!
//! Measures:
//! - `get` hits on a populated store
//! - `put` at the size bound (every insert evicts)
//! - mark pass over a fully unreferenced store
//!
//! Run with:
//! ```bash
//! cargo bench --bench store_bench
//! ```

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use infocache_core::{CacheConfig, CacheStore, Descriptor, EventBus, EvictionTarget, ResourceId};
use std::hint::black_box;
use std::sync::Arc;

struct Inert;

impl Descriptor for Inert {
    fn refresh(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn populated(size: usize, max_entries: usize) -> (Arc<CacheStore<Inert>>, Vec<ResourceId>) {
    let config = CacheConfig::default().with_max_entries(max_entries);
    let store = CacheStore::new(config, None, EventBus::default()).unwrap();
    let ids: Vec<ResourceId> = (0..size)
        .map(|i| ResourceId::new(format!("/bench/dir{}/file{}", i % 64, i)))
        .collect();
    for id in &ids {
        store.put(id.clone(), Arc::new(Inert));
    }
    (store, ids)
}

fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_get");

    for size in [1_000usize, 100_000] {
        let (store, ids) = populated(size, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 7919) % ids.len();
                black_box(store.get(&ids[i]))
            });
        });
    }

    group.finish();
}

fn bench_put_at_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_put_evicting");
    let (store, _) = populated(10_000, 10_000);

    group.bench_function("put", |b| {
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            store.put(ResourceId::new(format!("/bench/new/{n}")), Arc::new(Inert));
        });
    });

    group.finish();
}

fn bench_mark_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction_mark");

    for size in [1_000usize, 50_000] {
        let (store, _) = populated(size, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(store.mark_unreferenced()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_get_hit, bench_put_at_capacity, bench_mark_pass);
criterion_main!(benches);
