use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use memtable::Memtable;
use sstable::{SstBuilder, SstHeader};
use tempfile::tempdir;

const N_KEYS: u64 = 10_000;
const VALUE_SIZE: usize = 100;

fn build_memtable() -> Memtable {
    let mut mem = Memtable::new();
    for i in 0..N_KEYS {
        mem.insert(i, "x".repeat(VALUE_SIZE));
    }
    mem
}

fn sstable_write_benchmark(c: &mut Criterion) {
    c.bench_function("sstable_write_from_memtable_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.sst");
                let mem = build_memtable();
                (dir, path, mem)
            },
            |(_dir, path, mem)| {
                SstBuilder::from_memtable(&mem, 1).finish(&path).unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn sstable_get_hit_benchmark(c: &mut Criterion) {
    c.bench_function("sstable_get_hit_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.sst");
                let header = SstBuilder::from_memtable(&build_memtable(), 1)
                    .finish(&path)
                    .unwrap();
                (dir, header)
            },
            |(_dir, header): (_, SstHeader)| {
                for i in 0..N_KEYS {
                    let v = header.get(i).unwrap();
                    assert!(v.is_some());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn sstable_get_miss_benchmark(c: &mut Criterion) {
    c.bench_function("sstable_get_miss_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.sst");
                let header = SstBuilder::from_memtable(&build_memtable(), 1)
                    .finish(&path)
                    .unwrap();
                (dir, header)
            },
            |(_dir, header): (_, SstHeader)| {
                for i in 0..N_KEYS {
                    let v = header.get(N_KEYS + i).unwrap();
                    assert!(v.is_none());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    sstable_write_benchmark,
    sstable_get_hit_benchmark,
    sstable_get_miss_benchmark
);
criterion_main!(benches);
