use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use trellis_core::idmap::{LogList, MapTree};

/// A random sequence of single-node inserts and subtree deletes.
fn edits(count: usize) -> Vec<(bool, f64, u32)> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| (rng.random_bool(0.7), rng.random::<f64>(), rng.random_range(1..8)))
        .collect()
}

/// Replays `edits` and returns the number of ids issued.
macro_rules! replay {
    ($map:expr, $edits:expr) => {{
        let mut len = 0u32;
        let mut next = 0u32;
        for &(insert, at, count) in $edits {
            if insert || len == 0 {
                let pre = (at * f64::from(len + 1)) as u32;
                $map.insert(pre.min(len), next, count);
                len += count;
                next += count;
            } else {
                let pre = ((at * f64::from(len)) as u32).min(len - 1);
                let count = count.min(len - pre);
                $map.delete(pre, count);
                len -= count;
            }
        }
        next
    }};
}

fn bench_edits(c: &mut Criterion) {
    let mut group = c.benchmark_group("id_edits");
    group.sample_size(20);

    for count in [1_000usize, 10_000] {
        let edits = edits(count);
        group.bench_with_input(BenchmarkId::new("map_tree", count), &edits, |b, edits| {
            b.iter(|| {
                let mut map = MapTree::new();
                black_box(replay!(map, edits))
            });
        });
        group.bench_with_input(BenchmarkId::new("log_list", count), &edits, |b, edits| {
            b.iter(|| {
                let mut map = LogList::new();
                black_box(replay!(map, edits))
            });
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("id_lookup");
    let edits = edits(5_000);

    let mut tree = MapTree::new();
    let issued = replay!(tree, &edits);
    let mut log = LogList::new();
    replay!(log, &edits);

    let mut rng = StdRng::seed_from_u64(7);
    let lookups: Vec<u32> = (0..1000).map(|_| rng.random_range(0..issued)).collect();

    group.bench_function("map_tree", |b| {
        b.iter(|| lookups.iter().filter_map(|&id| tree.pre(black_box(id))).count());
    });
    group.bench_function("log_list", |b| {
        b.iter(|| lookups.iter().filter_map(|&id| log.pre(black_box(id))).count());
    });

    group.finish();
}

criterion_group!(benches, bench_edits, bench_lookup);
criterion_main!(benches);
