//! Benchmarks for the Compressed Line Offset Store's append and random-access
//! paths.
//!
//! Run with: `cargo bench --bench store_benchmarks`
//! Results are saved to `target/criterion/` with HTML reports.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use klogg_core::store::CompressedLineStore;

/// Builds a store of `line_count` lines, each `line_len` bytes long.
fn build_store(line_count: u64, line_len: u64) -> CompressedLineStore {
    let mut store = CompressedLineStore::new(128);
    let mut offset = 0u64;
    for _ in 0..line_count {
        offset += line_len;
        store.append(offset);
    }
    store
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_append");

    for count in [10_000, 100_000, 1_000_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| build_store(count, 80));
        });
    }

    group.finish();
}

fn bench_random_access(c: &mut Criterion) {
    let store = build_store(1_000_000, 80);

    let mut group = c.benchmark_group("store_at");
    group.bench_function("at_midpoint", |b| {
        b.iter(|| store.at(500_000));
    });
    group.bench_function("at_tail", |b| {
        b.iter(|| store.at(999_999));
    });
    group.finish();
}

criterion_group!(benches, bench_append, bench_random_access);
criterion_main!(benches);
