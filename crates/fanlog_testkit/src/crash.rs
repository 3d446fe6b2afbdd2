//! Crash simulation for fanlog journals.
//!
//! A writer that dies mid-append leaves one of a few shapes on disk. This
//! module reproduces those shapes on a real journal directory so tests can
//! check that the next writer recovers them.
//!
//! ## Crash shapes
//!
//! 1. **Torn record** - part of a record reached the data file
//! 2. **Unindexed record** - the whole record, but no index entry
//! 3. **Torn index entry** - the record and part of its index entry
//! 4. **Lost index** - the index file of the open segment is gone
//!
//! In every case the messages committed before the crash must survive and
//! the interrupted one must not appear.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fanlog_testkit::crash::{CrashPoint, CrashRecoveryHarness};
//!
//! let mut harness = CrashRecoveryHarness::with_temp_dir()?;
//! let result = harness.check(CrashPoint::TornIndexEntry);
//! assert!(result.passed, "{result:?}");
//! ```

use fanlog_core::segment::{encode_record, IndexEntry};
use fanlog_core::{
    FileFault, Journal, JournalConfig, JournalDir, JournalError, JournalResult, LogId, Position,
    Timestamp,
};
use fanlog_storage::{FileBackend, StorageBackend, StorageError, StorageResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash while the record bytes were being written.
    TornRecord,
    /// Crash after the record, before its index entry.
    UnindexedRecord,
    /// Crash while the index entry was being written.
    TornIndexEntry,
    /// The open segment's index was lost.
    LostIndex,
}

impl CrashPoint {
    /// Every crash point.
    pub const ALL: [CrashPoint; 4] = [
        CrashPoint::TornRecord,
        CrashPoint::UnindexedRecord,
        CrashPoint::TornIndexEntry,
        CrashPoint::LostIndex,
    ];
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Messages expected after recovery.
    pub expected_messages: usize,
    /// Messages found after recovery.
    pub actual_messages: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, messages: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_messages: messages,
            actual_messages: messages,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_messages: expected,
            actual_messages: actual,
            error: Some(error.to_string()),
        }
    }
}

fn simulated_crash(what: &str) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, format!("simulated crash {what}")))
}

/// A storage backend wrapper that can simulate crashes.
///
/// Once the byte budget set by [`CrashableBackend::crash_after`] runs out,
/// the write that crosses it is cut short and every later write fails.
pub struct CrashableBackend<B> {
    inner: B,
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl<B: StorageBackend> CrashableBackend<B> {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }

    /// Sets the backend to crash after writing the specified number of bytes.
    pub fn crash_after(&self, bytes: usize) {
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether flush and sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Returns the wrapped backend.
    pub fn into_inner(self) -> B {
        self.inner
    }

    fn check_sync(&self, what: &str) -> StorageResult<()> {
        if self.fail_on_sync.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(simulated_crash(what));
        }
        Ok(())
    }
}

impl<B: StorageBackend> StorageBackend for CrashableBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let current = self.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        let threshold = self.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(simulated_crash("during write"));
        }

        if current + bytes.len() > threshold {
            self.crashed.store(true, Ordering::SeqCst);
            let partial = threshold - current;
            if partial > 0 {
                let _ = self.inner.append(&bytes[..partial]);
            }
            return Err(simulated_crash("during partial write"));
        }

        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_sync("during flush")?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn refresh(&mut self) -> StorageResult<u64> {
        self.inner.refresh()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_sync("during sync")?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// Leaves the newest segment of the journal at `path` as a writer
/// appending `payload` would have left it when crashing at `point`.
///
/// The journal's writers must be closed.
pub fn simulate_crash(path: &Path, point: CrashPoint, payload: &[u8]) -> JournalResult<()> {
    let dir = JournalDir::open(path)?;
    let epoch = dir.segment_epochs()?.last().copied().unwrap_or(0);
    let data_path = dir.segment_path(epoch);
    let index_path = dir.index_path(epoch);

    if point == CrashPoint::LostIndex {
        return fs::remove_file(&index_path)
            .map_err(|e| JournalError::index(FileFault::Open, epoch, e));
    }

    let record = encode_record(payload, Timestamp::now());
    let data = FileBackend::open_existing(&data_path)
        .map_err(|e| JournalError::segment(FileFault::Open, epoch, e))?;
    let mut data = CrashableBackend::new(data);
    if point == CrashPoint::TornRecord {
        data.crash_after(record.len() / 2);
    }
    let offset = match data.append(&record) {
        Ok(offset) => offset,
        Err(_) if data.has_crashed() => return Ok(()),
        Err(e) => return Err(JournalError::segment(FileFault::Write, epoch, e)),
    };
    data.into_inner()
        .sync()
        .map_err(|e| JournalError::segment(FileFault::Write, epoch, e))?;
    if point == CrashPoint::UnindexedRecord {
        return Ok(());
    }

    let index = FileBackend::open_existing(&index_path)
        .map_err(|e| JournalError::index(FileFault::Open, epoch, e))?;
    let mut index = CrashableBackend::new(index);
    let entries = index
        .size()
        .map_err(|e| JournalError::index(FileFault::Seek, epoch, e))?
        / IndexEntry::SIZE as u64;
    let entry = IndexEntry {
        sequence: u32::try_from(entries + 1).unwrap_or(u32::MAX),
        offset,
        length: u32::try_from(payload.len()).unwrap_or(u32::MAX),
    };
    index.crash_after(IndexEntry::SIZE / 2);
    let _ = index.append(&entry.encode());
    Ok(())
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    /// Path to the journal directory.
    pub journal_path: PathBuf,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
    _temp_dir: Option<TempDir>,
}

impl CrashRecoveryHarness {
    /// Messages committed before each simulated crash.
    pub const COMMITTED: usize = 5;

    /// Creates a new crash recovery harness.
    pub fn new(journal_path: impl AsRef<Path>) -> Self {
        Self {
            journal_path: journal_path.as_ref().to_path_buf(),
            results: Vec::new(),
            _temp_dir: None,
        }
    }

    /// Creates a new harness with a temporary directory.
    pub fn with_temp_dir() -> io::Result<Self> {
        let temp_dir = TempDir::new()?;
        let mut harness = Self::new(temp_dir.path().join("journal"));
        harness._temp_dir = Some(temp_dir);
        Ok(harness)
    }

    fn open_fresh(&self) -> JournalResult<Journal> {
        // Each check starts from an empty journal
        let _ = fs::remove_dir_all(&self.journal_path);
        Journal::open_or_create(&self.journal_path, &JournalConfig::default())
    }

    /// Commits some messages, crashes at `point`, and checks that the
    /// committed messages survive a writer reopen and nothing else appears.
    pub fn check(&mut self, point: CrashPoint) -> CrashRecoveryResult {
        let description = format!("recovery from {point:?}");
        let result = match self.run_check(point) {
            Ok(found) if found == Self::COMMITTED + 1 => {
                CrashRecoveryResult::pass(&description, found)
            }
            Ok(found) => CrashRecoveryResult::fail(
                &description,
                Self::COMMITTED + 1,
                found,
                "wrong message count after recovery",
            ),
            Err(e) => {
                CrashRecoveryResult::fail(&description, Self::COMMITTED + 1, 0, &e.to_string())
            }
        };
        self.results.push(result.clone());
        result
    }

    /// Runs [`check`](Self::check) for every crash point.
    pub fn check_all(&mut self) -> Vec<CrashRecoveryResult> {
        CrashPoint::ALL.iter().map(|&point| self.check(point)).collect()
    }

    /// Returns whether every check so far passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    fn run_check(&self, point: CrashPoint) -> JournalResult<usize> {
        let journal = self.open_fresh()?;
        journal.add_subscriber("check", Position::Begin)?;
        let writer = journal.open_writer()?;
        for i in 0..Self::COMMITTED {
            writer.write(format!("committed-{i}").as_bytes())?;
        }
        writer.close()?;
        drop(journal);

        simulate_crash(&self.journal_path, point, b"interrupted")?;

        // The next writer repairs the tail and continues after the
        // committed messages.
        let journal = Journal::open(&self.journal_path)?;
        let writer = journal.open_writer()?;
        let id = writer.write(b"after")?;
        writer.close()?;
        let expected_id = LogId::new(0, u32::try_from(Self::COMMITTED + 1).unwrap_or(u32::MAX));
        if id != expected_id {
            return Ok(0);
        }

        let mut reader = journal.open_reader("check")?;
        let mut found = 0;
        loop {
            let interval = reader.read_interval()?;
            if interval.is_empty() {
                break;
            }
            for id in interval.ids() {
                let message = reader.read_message(id)?;
                let expected = if found < Self::COMMITTED {
                    format!("committed-{found}").into_bytes()
                } else {
                    b"after".to_vec()
                };
                if message.payload != expected {
                    return Ok(found);
                }
                found += 1;
            }
            reader.checkpoint(interval.last)?;
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanlog_storage::InMemoryBackend;

    #[test]
    fn crashable_backend_cuts_the_crossing_write() {
        let mut backend = CrashableBackend::new(InMemoryBackend::new());
        backend.crash_after(6);
        backend.append(b"abcd").unwrap();
        assert!(backend.append(b"efgh").is_err());
        assert!(backend.has_crashed());
        assert!(backend.append(b"ij").is_err());
        assert_eq!(backend.size().unwrap(), 6);
    }

    #[test]
    fn failing_sync_is_reported() {
        let mut backend = CrashableBackend::new(InMemoryBackend::new());
        backend.set_fail_on_sync(true);
        backend.append(b"x").unwrap();
        assert!(backend.sync().is_err());
        assert!(backend.has_crashed());
    }

    #[test]
    fn every_crash_point_recovers() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        for result in harness.check_all() {
            assert!(result.passed, "{result:?}");
        }
        assert!(harness.all_passed());
    }
}
