//! Stress runs for fanlog.
//!
//! These exercise the journal under load: many writers appending at once
//! and subscribers consuming while writes are still arriving.

use fanlog_core::{Journal, LogId, Position};
use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Messages each writer appends.
    pub messages_per_writer: usize,
    /// Number of concurrent writers.
    pub writers: usize,
    /// Number of concurrent subscribers.
    pub subscribers: usize,
    /// Payload size in bytes.
    pub payload_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            messages_per_writer: 500,
            writers: 4,
            subscribers: 2,
            payload_size: 64,
        }
    }
}

impl StressConfig {
    /// Messages appended across all writers.
    pub fn total_messages(&self) -> usize {
        self.writers * self.messages_per_writer
    }
}

/// Payload carrying its writer and per-writer sequence, padded to `size`.
fn tagged_payload(writer: usize, seq: usize, size: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(size.max(16));
    payload.extend_from_slice(&(writer as u64).to_le_bytes());
    payload.extend_from_slice(&(seq as u64).to_le_bytes());
    payload.resize(size.max(16), 0xAB);
    payload
}

fn parse_tag(payload: &[u8]) -> Option<(usize, usize)> {
    let writer = u64::from_le_bytes(payload.get(0..8)?.try_into().ok()?);
    let seq = u64::from_le_bytes(payload.get(8..16)?.try_into().ok()?);
    Some((writer as usize, seq as usize))
}

/// Run a sequential write stress test with one writer.
pub fn stress_sequential_writes(journal: &Journal, config: &StressConfig) -> StressTestResult {
    let Ok(writer) = journal.open_writer() else {
        return StressTestResult::new(0, config.messages_per_writer, Duration::ZERO);
    };
    let data = vec![0xABu8; config.payload_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;
    for _ in 0..config.messages_per_writer {
        match writer.write(&data) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }
    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run writers on separate threads, each with its own writer handle.
///
/// Fails an operation for every write error and for every id handed out
/// twice.
pub fn stress_concurrent_writers(journal: &Journal, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let results: Vec<(Vec<LogId>, usize)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.writers)
            .map(|w| {
                scope.spawn(move || {
                    let Ok(writer) = journal.open_writer() else {
                        return (Vec::new(), config.messages_per_writer);
                    };
                    let mut ids = Vec::with_capacity(config.messages_per_writer);
                    let mut failed = 0;
                    for seq in 0..config.messages_per_writer {
                        match writer.write(&tagged_payload(w, seq, config.payload_size)) {
                            Ok(id) => ids.push(id),
                            Err(_) => failed += 1,
                        }
                    }
                    (ids, failed)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or((Vec::new(), config.messages_per_writer)))
            .collect()
    });

    let mut seen = HashSet::new();
    let mut successful = 0;
    let mut failed = 0;
    for (ids, errors) in results {
        failed += errors;
        for id in ids {
            if seen.insert(id) {
                successful += 1;
            } else {
                failed += 1;
            }
        }
    }
    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run writers and subscribers at the same time.
///
/// Every subscriber is registered at `Begin` and must receive each message
/// exactly once, with every writer's messages in the order it wrote them.
/// Each delivered message counts as one operation; duplicates, gaps and
/// reordering count as failures.
pub fn stress_concurrent_fanout(journal: &Journal, config: &StressConfig) -> StressTestResult {
    let names: Vec<String> = (0..config.subscribers).map(|i| format!("sub-{i}")).collect();
    for name in &names {
        if journal.add_subscriber(name, Position::Begin).is_err() {
            return StressTestResult::new(0, config.total_messages() * config.subscribers, Duration::ZERO);
        }
    }

    let start = Instant::now();
    let (successful, failed) = thread::scope(|scope| {
        for w in 0..config.writers {
            scope.spawn(move || {
                let Ok(writer) = journal.open_writer() else {
                    return;
                };
                for seq in 0..config.messages_per_writer {
                    let _ = writer.write(&tagged_payload(w, seq, config.payload_size));
                }
            });
        }

        let readers: Vec<_> = names
            .iter()
            .map(|name| scope.spawn(move || consume(journal, name, config)))
            .collect();
        readers
            .into_iter()
            .map(|h| h.join().unwrap_or((0, config.total_messages())))
            .fold((0, 0), |(s, f), (rs, rf)| (s + rs, f + rf))
    });
    StressTestResult::new(successful, failed, start.elapsed())
}

fn consume(journal: &Journal, name: &str, config: &StressConfig) -> (usize, usize) {
    let total = config.total_messages();
    let Ok(mut reader) = journal.open_reader(name) else {
        return (0, total);
    };
    let mut next = vec![0usize; config.writers];
    let mut successful = 0;
    let mut failed = 0;
    let deadline = Instant::now() + Duration::from_secs(60);

    while successful + failed < total && Instant::now() < deadline {
        let Ok(interval) = reader.read_interval() else {
            failed += 1;
            continue;
        };
        if interval.is_empty() {
            thread::yield_now();
            continue;
        }
        for id in interval.ids() {
            let tag = reader.read_message(id).ok().and_then(|m| parse_tag(&m.payload));
            match tag {
                Some((w, seq)) if w < next.len() && next[w] == seq => {
                    next[w] += 1;
                    successful += 1;
                }
                _ => failed += 1,
            }
        }
        if reader.checkpoint(interval.last).is_err() {
            failed += 1;
        }
    }
    let missing = total.saturating_sub(successful + failed);
    (successful, failed + missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestJournal;

    fn small() -> StressConfig {
        StressConfig {
            messages_per_writer: 50,
            writers: 3,
            subscribers: 2,
            payload_size: 32,
        }
    }

    #[test]
    fn sequential_writes_succeed() {
        let journal = TestJournal::new();
        let result = stress_sequential_writes(&journal, &small());
        assert_eq!(result.successful_ops, 50);
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn concurrent_writers_get_distinct_ids() {
        let journal = TestJournal::with_capacity(16, 32);
        let config = small();
        let result = stress_concurrent_writers(&journal, &config);
        assert_eq!(result.successful_ops, config.total_messages());
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn fanout_delivers_everything_once_in_order() {
        let journal = TestJournal::with_capacity(20, 32);
        let config = small();
        let result = stress_concurrent_fanout(&journal, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, config.total_messages() * config.subscribers);
    }
}
