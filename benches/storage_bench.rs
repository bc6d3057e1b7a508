//! Benchmarks for xbase tables and indexes
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tempfile::tempdir;
use xbase_engine::index::{BTree, ByteKey, Entry, DEFAULT_ORDER};
use xbase_engine::schema::parse_field_list;
use xbase_engine::{Area, AreaOptions, IndexSpec, TableFile};

/// Keys in a scrambled but reproducible order
fn scrambled_keys(count: usize) -> Vec<ByteKey> {
    (0..count)
        .map(|i| {
            let n = (i as u64).wrapping_mul(2_654_435_761) % 1_000_000;
            ByteKey::from(format!("{:08}", n).as_str())
        })
        .collect()
}

fn bench_btree(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree");

    for size in [1_000, 10_000] {
        let keys = scrambled_keys(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("insert_{}", size), |b| {
            b.iter(|| {
                let mut tree = BTree::new(DEFAULT_ORDER);
                for (i, key) in keys.iter().enumerate() {
                    tree.insert(key.clone(), i as u32 + 1);
                }
                black_box(tree.len())
            })
        });

        group.bench_function(format!("bulk_load_{}", size), |b| {
            b.iter_batched(
                || {
                    keys.iter()
                        .enumerate()
                        .map(|(i, k)| Entry::new(k.clone(), i as u32 + 1))
                        .collect::<Vec<_>>()
                },
                |entries| black_box(BTree::bulk_load(DEFAULT_ORDER, entries)),
                BatchSize::LargeInput,
            )
        });

        let mut tree = BTree::new(DEFAULT_ORDER);
        for (i, key) in keys.iter().enumerate() {
            tree.insert(key.clone(), i as u32 + 1);
        }

        group.bench_function(format!("seek_ge_{}", size), |b| {
            b.iter(|| {
                for key in keys.iter().step_by(7) {
                    black_box(tree.seek_ge(key));
                }
            })
        });
    }

    group.finish();
}

fn bench_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("table");
    let fields = parse_field_list("NAME C 20, AGE N 3 0, JOINED D").unwrap();

    group.bench_function("append_write", |b| {
        let dir = tempdir().unwrap();
        let mut table = TableFile::create(dir.path().join("bench.dbf"), &fields).unwrap();

        b.iter(|| {
            table.append_blank().unwrap();
            table.set(0, black_box("BENCHMARK")).unwrap();
            table.set(1, "42").unwrap();
            table.set(2, "20240131").unwrap();
            table.write_current().unwrap()
        });
    });

    group.bench_function("append_indexed", |b| {
        let dir = tempdir().unwrap();
        let mut area = Area::new(AreaOptions {
            autosave: false,
            ..AreaOptions::default()
        });
        area.create(dir.path().join("bench.dbf"), &fields).unwrap();
        area.ensure_tag(IndexSpec::parse("NAME", "NAME").unwrap()).unwrap();
        area.ensure_tag(IndexSpec::parse("AGE", "AGE").unwrap()).unwrap();

        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            area.append_blank().unwrap();
            area.set(0, &format!("NAME{:06}", n * 7919 % 100_000)).unwrap();
            area.set(1, &(n % 100).to_string()).unwrap();
            area.write_current().unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_btree, bench_table);
criterion_main!(benches);
