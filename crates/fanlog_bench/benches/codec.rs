//! On-disk codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fanlog_bench::{random_data, random_ids};
use fanlog_core::segment::{encode_record, IndexEntry, RecordHeader};
use fanlog_core::{LogId, Timestamp};

/// Benchmark log id encoding, decoding and formatting.
fn bench_log_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_id");
    let ids = random_ids(1024, 1000, 100_000);

    group.throughput(Throughput::Elements(ids.len() as u64));
    group.bench_function("encode_decode", |b| {
        b.iter(|| {
            for id in &ids {
                let bytes = black_box(id.encode());
                black_box(LogId::decode(&bytes).unwrap());
            }
        });
    });

    group.bench_function("display", |b| {
        b.iter(|| {
            for id in &ids {
                black_box(id.to_string());
            }
        });
    });

    group.finish();
}

/// Benchmark record encoding, which includes the payload checksum.
fn bench_encode_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_record");
    let timestamp = Timestamp::now();

    for size in [64usize, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let payload = random_data(size);
            b.iter(|| black_box(encode_record(black_box(&payload), timestamp)));
        });
    }

    group.finish();
}

/// Benchmark header decoding plus checksum verification.
fn bench_verify_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify_record");

    for size in [64usize, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let payload = random_data(size);
            let record = encode_record(&payload, Timestamp::now());

            b.iter(|| {
                let header = RecordHeader::decode(0, 16, &record[..RecordHeader::SIZE]).unwrap();
                header
                    .verify(0, 16, black_box(&record[RecordHeader::SIZE..]))
                    .unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark index entry encoding and decoding.
fn bench_index_entry(c: &mut Criterion) {
    c.bench_function("index_entry_round_trip", |b| {
        let entry = IndexEntry {
            sequence: 42,
            offset: 123_456,
            length: 512,
        };
        b.iter(|| {
            let bytes = black_box(entry.encode());
            black_box(IndexEntry::decode(&bytes));
        });
    });
}

criterion_group!(
    benches,
    bench_log_id,
    bench_encode_record,
    bench_verify_record,
    bench_index_entry,
);

criterion_main!(benches);
