//! R-Tree benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use paged_rtree::{DiskRTree, Envelope, RTreeConfig, SplitPolicy};
use std::hint::black_box;
use tempfile::tempdir;

fn grid_cell(i: u64) -> Envelope {
    let x = (i % 100) as f64;
    let y = (i / 100) as f64;
    Envelope::new_2d(x, y, x + 1.0, y + 1.0)
}

fn config(policy: SplitPolicy) -> RTreeConfig {
    RTreeConfig::builder()
        .max_entries(32)
        .split_policy(policy)
        .build()
        .unwrap()
}

fn bench_disk_rtree_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("DiskRTree Insert");

    for policy in [SplitPolicy::Quadratic, SplitPolicy::Linear] {
        for size in [100u64, 1000].iter() {
            let id = BenchmarkId::new(policy.to_string(), size);
            group.bench_with_input(id, size, |b, &size| {
                b.iter_with_setup(
                    || {
                        let dir = tempdir().unwrap();
                        let path = dir.path().join("bench.rtree");
                        (DiskRTree::<u64>::create(&path, config(policy)).unwrap(), dir)
                    },
                    |(tree, _dir)| {
                        for i in 0..size {
                            tree.insert(&i, &grid_cell(i)).unwrap();
                        }
                        black_box(tree.len())
                    },
                );
            });
        }
    }

    group.finish();
}

fn bench_disk_rtree_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("DiskRTree Search");

    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.rtree");
    let tree = DiskRTree::<u64>::create(&path, config(SplitPolicy::Quadratic)).unwrap();

    // Populate tree
    for i in 0..5000 {
        tree.insert(&i, &grid_cell(i)).unwrap();
    }

    group.bench_function("search_5k", |b| {
        b.iter(|| {
            let query = Envelope::new_2d(25.0, 10.0, 75.0, 40.0);
            black_box(tree.search(&query).unwrap().count())
        });
    });

    group.bench_function("ids_5k", |b| {
        b.iter(|| {
            let query = Envelope::new_2d(25.0, 10.0, 75.0, 40.0);
            black_box(tree.find_intersecting_ids(&query).unwrap())
        });
    });

    group.bench_function("nearest_10", |b| {
        b.iter(|| black_box(tree.nearest(&[50.5, 25.5], 10, None).unwrap()));
    });

    tree.set_cache_capacity(0).unwrap();
    group.bench_function("search_5k_uncached", |b| {
        b.iter(|| {
            let query = Envelope::new_2d(25.0, 10.0, 75.0, 40.0);
            black_box(tree.search(&query).unwrap().count())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_disk_rtree_insert, bench_disk_rtree_search);
criterion_main!(benches);
