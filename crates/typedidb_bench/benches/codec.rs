//! CBOR codec and key ordering benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use typedidb_codec::{from_cbor, to_canonical_cbor, CanonicalEncoder, Key, Value};

/// A record shaped like the ones the request benchmarks store.
fn simple_record() -> Value {
    Value::object([
        ("id", Value::Integer(42)),
        ("name", Value::Text("Alice".into())),
        ("email", Value::Text("alice@example.com".into())),
        ("joined", Value::Date(1_700_000_000_000)),
    ])
}

/// Create a nested value.
fn nested_value(depth: usize, width: usize) -> Value {
    if depth == 0 {
        Value::Text("leaf".into())
    } else {
        let children: Vec<(Value, Value)> = (0..width)
            .map(|i| (Value::Text(format!("key_{i}")), nested_value(depth - 1, width)))
            .collect();
        Value::map(children)
    }
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    group.bench_function("record", |b| {
        let value = simple_record();
        b.iter(|| black_box(to_canonical_cbor(black_box(&value))));
    });

    group.bench_function("nested_depth3_width5", |b| {
        let value = nested_value(3, 5);
        b.iter(|| black_box(to_canonical_cbor(black_box(&value))));
    });

    for size in [64, 1024, 16384] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("bytes", size), &size, |b, &size| {
            let value = Value::Bytes(vec![0u8; size]);
            b.iter(|| black_box(to_canonical_cbor(black_box(&value))));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    group.bench_function("record", |b| {
        let encoded = to_canonical_cbor(&simple_record());
        b.iter(|| black_box(from_cbor(black_box(&encoded)).unwrap()));
    });

    group.bench_function("nested_depth3_width5", |b| {
        let encoded = to_canonical_cbor(&nested_value(3, 5));
        b.iter(|| black_box(from_cbor(black_box(&encoded)).unwrap()));
    });

    group.finish();
}

fn bench_encoder_reuse(c: &mut Criterion) {
    c.bench_function("encoder_reuse_100", |b| {
        let values: Vec<_> = (0..100).map(Value::Integer).collect();

        b.iter(|| {
            let mut encoder = CanonicalEncoder::new();
            for value in &values {
                encoder.encode(black_box(value));
            }
            black_box(encoder.into_bytes());
        });
    });
}

fn bench_key_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_cmp");

    group.bench_function("text", |b| {
        let a = Key::from("alpha-beta-gamma");
        let z = Key::from("alpha-beta-gammb");
        b.iter(|| black_box(black_box(&a).cmp(black_box(&z))));
    });

    group.bench_function("composite", |b| {
        let a = Key::Array(vec![Key::from("hello"), Key::Number(5)]);
        let z = Key::Array(vec![Key::from("hello"), Key::Number(6)]);
        b.iter(|| black_box(black_box(&a).cmp(black_box(&z))));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_encoder_reuse,
    bench_key_order,
);

criterion_main!(benches);
