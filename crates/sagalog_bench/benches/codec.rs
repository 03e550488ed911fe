//! Entry codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sagalog_bench::json_payload;
use sagalog_core::{decode, encode, EntryId, SagaLogEntry, SagaLogEntryBuilder};

fn entry(builder: SagaLogEntryBuilder) -> SagaLogEntry {
    builder.id(EntryId::new(1_000_000)).build().unwrap()
}

/// Benchmark encoding each entry shape.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let b = SagaLogEntryBuilder::new;

    let shapes = [
        ("start_saga", entry(b().start_saga("ex-1", "Bench-Saga", "{}"))),
        ("start_action", entry(b().start_action("ex-1", "action1"))),
        ("end_action", entry(b().end_action("ex-1", "action1", r#"{"ok":true}"#))),
        ("end_saga", entry(b().end_saga("ex-1"))),
    ];

    for (name, entry) in shapes.iter() {
        group.bench_function(*name, |bencher| {
            bencher.iter(|| {
                let result = encode(black_box(entry));
                black_box(result);
            });
        });
    }

    group.finish();
}

/// Benchmark decoding each entry shape.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let shapes: [(&str, &[u8]); 4] = [
        ("start_saga", b"1000000 ex-1 StartSaga S Bench-Saga {}"),
        ("start_action", b"1000000 ex-1 StartAction action1"),
        ("end_action", br#"1000000 ex-1 EndAction action1 {"ok":true}"#),
        ("end_saga", b"1000000 ex-1 EndSaga S"),
    ];

    for (name, bytes) in shapes.iter() {
        group.bench_function(*name, |bencher| {
            bencher.iter(|| {
                let result = decode(black_box(bytes)).unwrap();
                black_box(result);
            });
        });
    }

    group.finish();
}

/// Benchmark encode and decode as the payload grows.
fn bench_payload_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_size");

    for size in [64, 1024, 16 * 1024].iter() {
        let entry = entry(SagaLogEntryBuilder::new().end_action(
            "ex-1",
            "action1",
            json_payload(*size),
        ));
        let bytes = encode(&entry);
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &entry, |b, entry| {
            b.iter(|| black_box(encode(black_box(entry))));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &bytes, |b, bytes| {
            b.iter(|| black_box(decode(black_box(bytes)).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_payload_size);
criterion_main!(benches);
