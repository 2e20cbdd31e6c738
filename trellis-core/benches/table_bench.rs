use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tempfile::TempDir;
use trellis_core::table::record::off;
use trellis_core::table::{DiskTable, MemTable, NodeKind, Record, TableAccess};

fn records(count: u32) -> Vec<u8> {
    (0..count).flat_map(|i| Record::text(NodeKind::Text, u64::from(i), 1, i).0).collect()
}

fn filled(table: &mut dyn TableAccess, count: u32) {
    table.insert(0, &records(count)).unwrap();
}

fn bench_splice(c: &mut Criterion) {
    let mut group = c.benchmark_group("splice");
    group.sample_size(50);

    for len in [10_000u32, 100_000] {
        group.bench_with_input(BenchmarkId::new("mem", len), &len, |b, &len| {
            let mut table = MemTable::new();
            filled(&mut table, len);
            let run = records(16);
            b.iter(|| {
                table.insert(black_box(len / 2), &run).unwrap();
                table.delete(black_box(len / 2), 16).unwrap();
            });
        });

        group.bench_with_input(BenchmarkId::new("disk", len), &len, |b, &len| {
            let dir = TempDir::new().unwrap();
            let mut table = DiskTable::create(dir.path()).unwrap();
            filled(&mut table, len);
            let run = records(16);
            b.iter(|| {
                table.insert(black_box(len / 2), &run).unwrap();
                table.delete(black_box(len / 2), 16).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    let dir = TempDir::new().unwrap();
    let mut table = DiskTable::create(dir.path()).unwrap();
    filled(&mut table, 100_000);
    // fragment the block directory
    for pre in (0..50_000).step_by(1000) {
        table.insert(pre, &records(3)).unwrap();
    }

    group.bench_function("read_ids", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for pre in 0..table.len() {
                sum += u64::from(table.read4(pre, off::ID));
            }
            black_box(sum)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_splice, bench_scan);
criterion_main!(benches);
