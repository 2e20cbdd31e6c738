use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tempfile::TempDir;
use trellis_core::{Builder, Data, DataOptions, IdentityMode, NodeKind};

fn catalog(data: Data, items: u32) -> Data {
    let mut b = Builder::new(data).unwrap();
    b.start_doc("catalog.xml").unwrap();
    b.start_ns("c", "urn:catalog").unwrap();
    b.start_elem("c:catalog", &[]).unwrap();
    for i in 0..items {
        b.start_elem("c:item", &[("sku", i.to_string().as_str())]).unwrap();
        b.text("a short description").unwrap();
        b.end_elem().unwrap();
    }
    b.end_elem().unwrap();
    b.end_doc().unwrap();
    b.finish().unwrap()
}

fn item() -> Data {
    let mut b = Builder::memory("item", &DataOptions::default());
    b.start_elem("item", &[("sku", "new")]).unwrap();
    b.text("inserted").unwrap();
    b.end_elem().unwrap();
    b.finish().unwrap()
}

fn bench_insert_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_delete");
    group.sample_size(30);
    let source = item();

    for mode in [IdentityMode::MapTree, IdentityMode::LogList] {
        let options = DataOptions { identity: mode, ..DataOptions::default() };
        group.bench_with_input(BenchmarkId::new("memory", format!("{mode:?}")), &options, |b, options| {
            let mut data = catalog(Data::memory("catalog", options), 10_000);
            b.iter(|| {
                data.insert(black_box(2), Some(1), &source).unwrap();
                data.delete(black_box(2)).unwrap();
            });
        });
    }

    group.bench_function("disk", |b| {
        let dir = TempDir::new().unwrap();
        let mut data = catalog(Data::create(dir.path(), "catalog", &DataOptions::default()).unwrap(), 10_000);
        b.iter(|| {
            data.insert(black_box(2), Some(1), &source).unwrap();
            data.delete(black_box(2)).unwrap();
        });
    });

    group.finish();
}

fn bench_rename(c: &mut Criterion) {
    let mut group = c.benchmark_group("rename");
    let mut data = catalog(Data::memory("catalog", &DataOptions::default()), 1_000);

    group.bench_function("toggle", |b| {
        let mut flip = false;
        b.iter(|| {
            let name: &[u8] = if flip { b"c:item" } else { b"c:entry" };
            data.rename(black_box(2), NodeKind::Elem, name, b"urn:catalog").unwrap();
            flip = !flip;
        });
    });

    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(20);

    group.bench_function("memory_10k", |b| {
        b.iter(|| black_box(catalog(Data::memory("catalog", &DataOptions::default()), 10_000).len()));
    });

    group.finish();
}

criterion_group!(benches, bench_insert_delete, bench_rename, bench_build);
criterion_main!(benches);
