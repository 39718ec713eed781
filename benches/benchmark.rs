//! Benchmarks for cursordb performance.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cursordb::{
    BackingStore, CursorDirection, IndexMetadata, KeyData, KeyRange, ObjectStoreMetadata,
    OptionsBuilder, TransactionMode,
};
use tempfile::TempDir;

const STORE: i64 = 1;
const INDEX: i64 = 1;

/// Populate a store with `count` records and a matching index.
fn populated(dir: &TempDir, count: i64, page_size: usize) -> BackingStore {
    let options = OptionsBuilder::new()
        .cursor_page_size(page_size)
        .build()
        .unwrap();
    let mut db =
        BackingStore::open_with_options(dir.path().join("bench.db"), "bench", options).unwrap();
    db.get_or_establish_metadata().unwrap();

    db.establish_transaction(1, vec![], TransactionMode::VersionChange)
        .unwrap();
    db.begin_transaction(1).unwrap();
    db.create_object_store(1, &ObjectStoreMetadata::new(STORE, "items"))
        .unwrap();
    db.create_index(1, STORE, &IndexMetadata::new(INDEX, "by_name"))
        .unwrap();
    for i in 0..count {
        let key = KeyData::from(i);
        let name = format!("name{:08}", (i * 7919) % count);
        db.put_record(1, STORE, &key, name.as_bytes()).unwrap();
        db.put_index_record(1, STORE, INDEX, &KeyData::from(name), &key)
            .unwrap();
    }
    db.commit_transaction(1).unwrap();
    db
}

/// Benchmark record writes inside one transaction.
fn bench_put_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_record");

    for size in [100i64, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_with_setup(
                || {
                    let dir = TempDir::new().unwrap();
                    let db = populated(&dir, 0, 64);
                    (dir, db)
                },
                |(_dir, mut db)| {
                    db.establish_transaction(2, vec![STORE], TransactionMode::ReadWrite)
                        .unwrap();
                    db.begin_transaction(2).unwrap();
                    for i in 0..size {
                        db.put_record(2, STORE, &KeyData::from(i), b"value").unwrap();
                    }
                    db.commit_transaction(2).unwrap();
                    black_box(())
                },
            );
        });
    }

    group.finish();
}

/// Benchmark full object store scans at different page sizes.
fn bench_cursor_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("cursor_scan");
    let count = 10000i64;
    group.throughput(Throughput::Elements(count as u64));

    for page_size in [1usize, 16, 64, 256].iter() {
        let dir = TempDir::new().unwrap();
        let mut db = populated(&dir, count, *page_size);
        db.establish_transaction(2, vec![STORE], TransactionMode::ReadOnly)
            .unwrap();
        db.begin_transaction(2).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(page_size), page_size, |b, _| {
            b.iter(|| {
                let (cursor, mut record) = db
                    .open_cursor(2, STORE, None, CursorDirection::Next, KeyRange::all())
                    .unwrap();
                let mut rows = 0u64;
                while !record.is_end() {
                    rows += 1;
                    record = db.advance_cursor(cursor, 1).unwrap();
                }
                db.unregister_cursor(cursor).unwrap();
                black_box(rows)
            });
        });
    }

    group.finish();
}

/// Benchmark index scans, which join every entry to its record.
fn bench_index_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_scan");
    let count = 10000i64;
    group.throughput(Throughput::Elements(count as u64));

    let dir = TempDir::new().unwrap();
    let mut db = populated(&dir, count, 64);
    db.establish_transaction(2, vec![STORE], TransactionMode::ReadOnly)
        .unwrap();
    db.begin_transaction(2).unwrap();

    for direction in [CursorDirection::Next, CursorDirection::PrevNoDuplicate] {
        group.bench_function(format!("{:?}", direction), |b| {
            b.iter(|| {
                let (cursor, mut record) = db
                    .open_cursor(2, STORE, Some(INDEX), direction, KeyRange::all())
                    .unwrap();
                while !record.is_end() {
                    record = db.advance_cursor(cursor, 1).unwrap();
                }
                db.unregister_cursor(cursor).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark a scan that writes ahead of itself, forcing a rearm per step.
fn bench_scan_with_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_with_writes");
    let count = 1000i64;
    group.throughput(Throughput::Elements(count as u64));

    group.bench_function("rewrite_each_row", |b| {
        b.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let mut db = populated(&dir, count, 64);
                db.establish_transaction(2, vec![STORE], TransactionMode::ReadWrite)
                    .unwrap();
                db.begin_transaction(2).unwrap();
                (dir, db)
            },
            |(_dir, mut db)| {
                let (cursor, mut record) = db
                    .open_cursor(2, STORE, None, CursorDirection::Next, KeyRange::all())
                    .unwrap();
                while let Some(key) = record.key.clone() {
                    db.put_record(2, STORE, &key, b"rewritten").unwrap();
                    record = db.advance_cursor(cursor, 1).unwrap();
                }
                db.rollback_transaction(2).unwrap();
            },
        );
    });

    group.finish();
}

/// Benchmark point lookups through a range.
fn bench_key_range_lookup(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let count = 10000i64;
    let mut db = populated(&dir, count, 64);
    db.establish_transaction(2, vec![STORE], TransactionMode::ReadOnly)
        .unwrap();
    db.begin_transaction(2).unwrap();

    let mut i = 0i64;
    c.bench_function("get_key_range_record", |b| {
        b.iter(|| {
            i = (i + 7919) % count;
            let range = KeyRange::lower_bound(i, false);
            black_box(db.get_key_range_record(2, STORE, &range).unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_put_record,
    bench_cursor_scan,
    bench_index_scan,
    bench_scan_with_writes,
    bench_key_range_lookup,
);
criterion_main!(benches);
