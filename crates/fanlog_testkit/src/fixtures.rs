//! Test fixtures and journal helpers.
//!
//! Provides temporary journals and the read/write loops most tests
//! repeat.

use fanlog_core::segment::{RecordHeader, SegmentHeader};
use fanlog_core::{Journal, JournalConfig, JournalResult, LogId, Reader};
use std::path::Path;
use tempfile::TempDir;

/// A journal in a temporary directory, removed on drop.
pub struct TestJournal {
    /// The journal.
    pub journal: Journal,
    _temp_dir: TempDir,
}

impl TestJournal {
    /// Creates a journal with the default configuration.
    pub fn new() -> Self {
        Self::with_config(&JournalConfig::default())
    }

    /// Creates a journal with `config`.
    pub fn with_config(config: &JournalConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let journal = Journal::open_or_create(temp_dir.path().join("journal"), config)
            .expect("Failed to create journal");
        Self {
            journal,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a journal whose segments hold exactly `messages` payloads of
    /// `payload_len` bytes.
    pub fn with_capacity(messages: u64, payload_len: usize) -> Self {
        Self::with_config(&JournalConfig::default().segment_size(segment_size_for(messages, payload_len)))
    }

    /// Returns the journal directory.
    pub fn path(&self) -> &Path {
        self.journal.path()
    }

    /// Opens a second, independent handle on the same directory, as
    /// another process would.
    pub fn reopen(&self) -> Journal {
        Journal::open(self.path()).expect("Failed to reopen journal")
    }
}

impl Default for TestJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestJournal {
    type Target = Journal;

    fn deref(&self) -> &Self::Target {
        &self.journal
    }
}

/// Segment capacity that fits exactly `messages` payloads of `payload_len`
/// bytes.
pub fn segment_size_for(messages: u64, payload_len: usize) -> u64 {
    SegmentHeader::SIZE as u64 + messages * (RecordHeader::SIZE + payload_len) as u64
}

/// Runs a test with a temporary journal.
///
/// # Example
///
/// ```rust,ignore
/// use fanlog_testkit::with_temp_journal;
///
/// #[test]
/// fn my_test() {
///     with_temp_journal(|journal| {
///         journal.open_writer().unwrap().write(b"x").unwrap();
///     });
/// }
/// ```
pub fn with_temp_journal<F, R>(f: F) -> R
where
    F: FnOnce(&Journal) -> R,
{
    let test_journal = TestJournal::new();
    f(&test_journal.journal)
}

/// Writes every payload through one writer and returns the assigned ids.
pub fn write_all(journal: &Journal, payloads: &[Vec<u8>]) -> Vec<LogId> {
    let writer = journal.open_writer().expect("Failed to open writer");
    let ids = payloads
        .iter()
        .map(|p| writer.write(p).expect("Failed to write"))
        .collect();
    writer.close().expect("Failed to close writer");
    ids
}

/// Reads every pending message, checkpointing after each batch.
pub fn drain(reader: &mut Reader) -> JournalResult<Vec<(LogId, Vec<u8>)>> {
    let mut out = Vec::new();
    loop {
        let interval = reader.read_interval()?;
        if interval.is_empty() {
            return Ok(out);
        }
        for id in interval.ids() {
            out.push((id, reader.read_message(id)?.payload));
        }
        reader.checkpoint(interval.last)?;
    }
}

/// Reads the next batch without checkpointing it.
pub fn peek_batch(reader: &mut Reader) -> JournalResult<Vec<LogId>> {
    let interval = reader.read_interval()?;
    let ids: Vec<LogId> = interval.ids().collect();
    for &id in &ids {
        reader.read_message(id)?;
    }
    Ok(ids)
}

/// Numbered payloads `"message-0"`, `"message-1"`, ...
pub fn numbered_payloads(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|i| format!("message-{i}").into_bytes()).collect()
}

/// Equal-length payloads, so segment capacities can be computed exactly.
pub fn fixed_payloads(count: usize, len: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let mut payload = vec![0u8; len];
            for (j, byte) in payload.iter_mut().enumerate() {
                *byte = (i + j) as u8;
            }
            payload
        })
        .collect()
}
