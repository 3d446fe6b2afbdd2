//! Benchmark utilities.

use fanlog_core::{Journal, JournalConfig, LogId, Position};
use rand::Rng;
use tempfile::TempDir;

/// Generate random payload bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` random payloads.
pub fn generate_payloads(count: usize, payload_size: usize) -> Vec<Vec<u8>> {
    (0..count).map(|_| random_data(payload_size)).collect()
}

/// Random log ids, as a reader replaying arbitrary positions would see.
pub fn random_ids(count: usize, max_epoch: u32, max_sequence: u32) -> Vec<LogId> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| LogId::new(rng.gen_range(0..=max_epoch), rng.gen_range(1..=max_sequence)))
        .collect()
}

/// Creates a journal holding `count` messages and one subscriber `"bench"`
/// registered at the start.
///
/// The returned directory must outlive the journal.
pub fn populated_journal(
    config: &JournalConfig,
    count: usize,
    payload_size: usize,
) -> (TempDir, Journal, Vec<LogId>) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let journal =
        Journal::open_or_create(dir.path().join("journal"), config).expect("Failed to create journal");
    journal
        .add_subscriber("bench", Position::Begin)
        .expect("Failed to add subscriber");

    let writer = journal.open_writer().expect("Failed to open writer");
    let payload = random_data(payload_size);
    let ids = (0..count)
        .map(|_| writer.write(&payload).expect("Failed to write"))
        .collect();
    writer.close().expect("Failed to close writer");
    (dir, journal, ids)
}
