//! Request and transaction benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use typedidb_bench::utils::{bench_schema, factory, generate_payloads, open, Payload, BENCH_STORE};
use typedidb_core::TransactionMode;

/// One put per read-write scope.
fn bench_single_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_put");

    for size in [64, 1024, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let (engine, factory) = factory(bench_schema(1));
            let db = open(&engine, &factory, "bench", 1);
            let payload = generate_payloads(1, size).remove(0);

            b.iter(|| {
                let scope = db.transaction(&[BENCH_STORE], TransactionMode::ReadWrite).unwrap();
                let store = scope.store::<Payload>(BENCH_STORE).unwrap();
                let written = store.put(black_box(&payload)).unwrap();
                black_box(engine.block_on(scope.after_commit(written)).unwrap().unwrap());
            });
        });
    }
    group.finish();
}

/// `put_all` in one scope: each put is issued from the completion of the
/// previous one.
fn bench_batch_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_put");

    for batch_size in [10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                let (engine, factory) = factory(bench_schema(1));
                let db = open(&engine, &factory, "bench", 1);
                let payloads = generate_payloads(batch_size, 256);

                b.iter(|| {
                    let scope = db.transaction(&[BENCH_STORE], TransactionMode::ReadWrite).unwrap();
                    let store = scope.store::<Payload>(BENCH_STORE).unwrap();
                    let written = store.put_all(payloads.clone()).unwrap();
                    black_box(engine.block_on(scope.after_commit(written)).unwrap().unwrap());
                });
            },
        );
    }
    group.finish();
}

/// A chain of dependent gets in one read-only scope.
fn bench_chained_gets(c: &mut Criterion) {
    let mut group = c.benchmark_group("chained_gets");

    for length in [10, 100, 1000] {
        group.throughput(Throughput::Elements(length as u64));
        group.bench_with_input(BenchmarkId::from_parameter(length), &length, |b, &length| {
            let (engine, factory) = factory(bench_schema(1));
            let db = open(&engine, &factory, "bench", 1);
            {
                let scope = db.transaction(&[BENCH_STORE], TransactionMode::ReadWrite).unwrap();
                let store = scope.store::<Payload>(BENCH_STORE).unwrap();
                let written = store.put_all(generate_payloads(length, 64)).unwrap();
                engine.block_on(scope.after_commit(written)).unwrap().unwrap();
            }

            b.iter(|| {
                let scope = db.transaction(&[BENCH_STORE], TransactionMode::ReadOnly).unwrap();
                let store = scope.store::<Payload>(BENCH_STORE).unwrap();
                let chain = (1..length as i64).fold(store.get(0i64).unwrap(), |chain, id| {
                    let store = store.clone();
                    chain.and_then(move |_| store.get(id))
                });
                black_box(engine.block_on(scope.after_commit(chain)).unwrap().unwrap());
            });
        });
    }
    group.finish();
}

/// Point lookups through a secondary index.
fn bench_index_get(c: &mut Criterion) {
    c.bench_function("index_get", |b| {
        let (engine, factory) = factory(bench_schema(1));
        let db = open(&engine, &factory, "bench", 1);
        {
            let scope = db.transaction(&[BENCH_STORE], TransactionMode::ReadWrite).unwrap();
            let store = scope.store::<Payload>(BENCH_STORE).unwrap();
            let written = store.put_all(generate_payloads(1000, 64)).unwrap();
            engine.block_on(scope.after_commit(written)).unwrap().unwrap();
        }

        b.iter(|| {
            let scope = db.transaction(&[BENCH_STORE], TransactionMode::ReadOnly).unwrap();
            let by_name = scope
                .store::<Payload>(BENCH_STORE)
                .unwrap()
                .index("by_name")
                .unwrap();
            let found = by_name.get(black_box("name-500")).unwrap();
            black_box(engine.block_on(scope.after_commit(found)).unwrap().unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_single_put,
    bench_batch_put,
    bench_chained_gets,
    bench_index_get,
);

criterion_main!(benches);
