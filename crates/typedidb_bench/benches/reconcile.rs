//! Schema reconciliation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use typedidb_bench::utils::{bench_schema, factory, open};

/// First open: every store and index is created.
fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_create");

    for stores in [1, 10, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(stores), &stores, |b, &stores| {
            let (engine, factory) = factory(bench_schema(stores));
            let mut round = 0u64;

            b.iter(|| {
                round += 1;
                let db = open(&engine, &factory, &format!("create-{round}"), 1);
                black_box(db.reconcile_report().map(|report| report.actions.len()));
            });
        });
    }
    group.finish();
}

/// Upgrades where every store and index is kept.
fn bench_keep(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_keep");

    for stores in [1, 10, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(stores), &stores, |b, &stores| {
            let (engine, factory) = factory(bench_schema(stores));
            let mut version = 1;
            drop(open(&engine, &factory, "keep", version));

            b.iter(|| {
                version += 1;
                let db = open(&engine, &factory, "keep", version);
                black_box(db.reconcile_report().map(|report| report.is_noop()));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_create, bench_keep);

criterion_main!(benches);
