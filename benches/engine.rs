//! Engine micro-benchmarks: insert throughput and point selects.

use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::TempDir;
use veldb::{Database, DbConfig};

fn bench_insert(c: &mut Criterion) {
    c.bench_function("insert_row", |b| {
        let dir = TempDir::new().unwrap();
        let mut config = DbConfig::default();
        config.wal.sync_on_commit = false;
        let mut db = Database::open(dir.path(), config).unwrap();
        db.execute("CREATE TABLE bench (id INT, payload TEXT)").unwrap();

        let mut i = 0i64;
        b.iter(|| {
            i += 1;
            db.execute(&format!("INSERT INTO bench VALUES ({}, 'payload')", i))
                .unwrap();
        });
    });
}

fn bench_point_select(c: &mut Criterion) {
    c.bench_function("point_select_indexed", |b| {
        let dir = TempDir::new().unwrap();
        let mut config = DbConfig::default();
        config.wal.sync_on_commit = false;
        let mut db = Database::open(dir.path(), config).unwrap();
        db.execute("CREATE TABLE bench (id INT, payload TEXT)").unwrap();
        db.execute("CREATE INDEX idx_id ON bench (id)").unwrap();
        for i in 0..1000 {
            db.execute(&format!("INSERT INTO bench VALUES ({}, 'p')", i))
                .unwrap();
        }

        b.iter(|| {
            db.execute("SELECT payload FROM bench WHERE id = 500").unwrap();
        });
    });
}

criterion_group!(benches, bench_insert, bench_point_select);
criterion_main!(benches);
