//! Criterion benchmarks for the consistency index.
//!
//! Run with: `cargo bench -p featstab-core`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use featstab_core::{consistency_index_k, partition, FeatureSet};

/// `k` overlapping selections of `size` features out of `num_features`.
fn generate_selections(k: usize, size: usize, num_features: usize) -> Vec<FeatureSet> {
    (0..k)
        .map(|i| (0..size).map(|j| (i * 7 + j * 3) % num_features).collect())
        .collect()
}

fn bench_kway(c: &mut Criterion) {
    let mut group = c.benchmark_group("consistency_index_k");

    for k in [5, 10, 20, 50].iter() {
        let selections = generate_selections(*k, 100, 1000);
        group.bench_with_input(BenchmarkId::from_parameter(k), k, |b, _| {
            b.iter(|| {
                let _ = consistency_index_k(black_box(&selections), 1000);
            });
        });
    }

    group.finish();
}

fn bench_partition(c: &mut Criterion) {
    c.bench_function("partition_1000x10x10", |b| {
        b.iter(|| {
            let _ = partition(black_box(1000), 10, 10, 42);
        });
    });
}

criterion_group!(benches, bench_kway, bench_partition);
criterion_main!(benches);
