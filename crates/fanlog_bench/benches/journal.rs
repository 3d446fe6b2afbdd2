//! Journal append and read benchmarks.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use fanlog_bench::{populated_journal, random_data, random_ids};
use fanlog_core::{Journal, JournalConfig, Safety};
use tempfile::TempDir;

/// Benchmark appends at each safety level.
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    for safety in [Safety::Unsafe, Safety::AlmostSafe, Safety::Safe] {
        if safety == Safety::Safe {
            // One fsync per append
            group.sample_size(20);
        }
        for size in [64usize, 1024, 16 * 1024] {
            group.throughput(Throughput::Bytes(size as u64));
            let id = BenchmarkId::new(format!("{safety:?}"), size);
            group.bench_with_input(id, &size, |b, &size| {
                let dir = TempDir::new().unwrap();
                let config = JournalConfig::new().safety(safety);
                let journal = Journal::open_or_create(dir.path().join("j"), &config).unwrap();
                let writer = journal.open_writer().unwrap();
                let data = random_data(size);

                b.iter(|| {
                    let id = writer.write(black_box(&data)).unwrap();
                    black_box(id);
                });
            });
        }
    }

    group.finish();
}

/// Benchmark appends that roll over often.
fn bench_rollover(c: &mut Criterion) {
    let mut group = c.benchmark_group("rollover");
    group.sample_size(30);

    group.bench_function("every_16_messages", |b| {
        let dir = TempDir::new().unwrap();
        let config = JournalConfig::new()
            .safety(Safety::Unsafe)
            .segment_size(16 + 16 * (20 + 256));
        let journal = Journal::open_or_create(dir.path().join("j"), &config).unwrap();
        let writer = journal.open_writer().unwrap();
        let data = random_data(256);

        b.iter(|| {
            let id = writer.write(black_box(&data)).unwrap();
            black_box(id);
        });
    });

    group.finish();
}

/// Benchmark computing an interval and reading it without checkpointing.
fn bench_read_interval(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_interval");

    for count in [100usize, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let (_dir, journal, _) = populated_journal(&JournalConfig::new(), count, 256);
            let mut reader = journal.open_reader("bench").unwrap();

            b.iter(|| {
                let interval = reader.read_interval().unwrap();
                for id in interval.ids() {
                    black_box(reader.read_message(id).unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark random-access reads across segments.
fn bench_random_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_read");

    group.bench_function("256b_across_8_segments", |b| {
        let config = JournalConfig::new().segment_size(16 + 500 * (20 + 256));
        let (_dir, journal, _) = populated_journal(&config, 4000, 256);

        b.iter_batched(
            || random_ids(64, 7, 500),
            |ids| {
                for id in ids {
                    black_box(journal.read_message(id).unwrap());
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Benchmark a full consume cycle: interval, reads, checkpoint.
fn bench_consume(c: &mut Criterion) {
    let mut group = c.benchmark_group("consume");
    group.sample_size(20);

    group.bench_function("1000_messages", |b| {
        b.iter_batched(
            || populated_journal(&JournalConfig::new().safety(Safety::Unsafe), 1000, 128),
            |(_dir, journal, _)| {
                let mut reader = journal.open_reader("bench").unwrap();
                loop {
                    let interval = reader.read_interval().unwrap();
                    if interval.is_empty() {
                        break;
                    }
                    for id in interval.ids() {
                        black_box(reader.read_message(id).unwrap());
                    }
                    reader.checkpoint(interval.last).unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_append,
    bench_rollover,
    bench_read_interval,
    bench_random_read,
    bench_consume,
);

criterion_main!(benches);
