//! Merkle search tree benchmarks
//!
//! - Bulk insert into a fresh tree
//! - Single insert into a populated tree
//! - Diff of two trees differing in one key
//!
//! Run with: `cargo bench --bench mst`

use atrepo::codec::cid_of;
use atrepo::ops::diff_trees;
use atrepo::{BlockTag, Cid, MemoryStore, Mst};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn key(i: usize) -> String {
    format!("app.bench.post/{:08}", i)
}

fn value(i: usize) -> Cid {
    cid_of(&i.to_be_bytes(), BlockTag::Record)
}

fn populate(mst: &Mst<'_, MemoryStore>, n: usize) -> Cid {
    let mut root = mst.empty().unwrap();
    for i in 0..n {
        root = mst.insert(root, &key(i), value(i)).unwrap();
    }
    root
}

fn bench_bulk_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("mst_bulk_insert");

    for size in [100usize, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let store = MemoryStore::new();
                let mst = Mst::new(&store);
                black_box(populate(&mst, size))
            })
        });
    }

    group.finish();
}

fn bench_single_insert(c: &mut Criterion) {
    let store = MemoryStore::new();
    let mst = Mst::new(&store);
    let root = populate(&mst, 10_000);

    let mut group = c.benchmark_group("mst_insert");
    group.throughput(Throughput::Elements(1));
    let mut i = 10_000;
    group.bench_function("into_10k", |b| {
        b.iter(|| {
            i += 1;
            black_box(mst.insert(root, &key(i), value(i)).unwrap())
        })
    });
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let store = MemoryStore::new();
    let mst = Mst::new(&store);

    let mut group = c.benchmark_group("mst_diff");
    for size in [1_000usize, 10_000] {
        let old = populate(&mst, size);
        let new = mst.insert(old, &key(size / 2), value(size + 1)).unwrap();

        group.bench_with_input(BenchmarkId::new("one_change", size), &size, |b, _| {
            b.iter(|| black_box(diff_trees(&store, old, new).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bulk_insert, bench_single_insert, bench_diff);
criterion_main!(benches);
