//! Offline inspection and repair of segments.
//!
//! Readers report corruption and stop; fixing it is left to the operator.
//! [`inspect_segment`] walks a data file record by record and compares it
//! with its index, [`repair_segment`] cuts the data file back to its valid
//! prefix and rewrites the index from what survives.

use crate::error::{ErrorKind, FileFault, JournalError, JournalResult};
use crate::journal::Journal;
use crate::segment::{RebuildReport, RecordScanner, ScanStop, SegmentIndex};
use fanlog_storage::FileBackend;
use std::fmt;
use std::fs;
use std::io;
use tracing::warn;

/// A defect found in a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// The segment header is missing or does not match the epoch.
    BadHeader(String),
    /// A record ended in the middle of its header.
    TornHeader {
        /// Offset of the partial header.
        offset: u64,
    },
    /// A record header had the wrong magic.
    BadMagic {
        /// Offset of the header.
        offset: u64,
    },
    /// A payload ran past the end of the file.
    TornPayload {
        /// Offset of the record.
        offset: u64,
    },
    /// A payload failed its checksum.
    CrcMismatch {
        /// Offset of the record.
        offset: u64,
    },
    /// The index file is missing.
    MissingIndex,
    /// The index file could not be interpreted.
    UnreadableIndex(String),
    /// An index entry points somewhere other than the scanned record.
    IndexMismatch {
        /// Sequence of the entry.
        sequence: u32,
        /// Offset of the record found by scanning.
        scanned: u64,
        /// Offset the index gives.
        indexed: u64,
    },
    /// The index lists more messages than the data file holds.
    IndexBeyondData {
        /// Entries in the index.
        indexed: u32,
        /// Valid records in the data file.
        records: u32,
    },
    /// Valid records without an index entry.
    UnindexedRecords {
        /// Entries in the index.
        indexed: u32,
        /// Valid records in the data file.
        records: u32,
    },
    /// The closing sentinel disagrees with the data file length.
    SentinelMismatch {
        /// Length recorded by the sentinel.
        sentinel: u64,
        /// Actual data file length.
        data_size: u64,
    },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadHeader(reason) => write!(f, "bad segment header: {reason}"),
            Self::TornHeader { offset } => write!(f, "torn record header at {offset}"),
            Self::BadMagic { offset } => write!(f, "bad record magic at {offset}"),
            Self::TornPayload { offset } => write!(f, "torn record payload at {offset}"),
            Self::CrcMismatch { offset } => write!(f, "checksum mismatch at {offset}"),
            Self::MissingIndex => f.write_str("index file missing"),
            Self::UnreadableIndex(reason) => write!(f, "unreadable index: {reason}"),
            Self::IndexMismatch {
                sequence,
                scanned,
                indexed,
            } => write!(
                f,
                "index entry {sequence} points at {indexed}, record found at {scanned}"
            ),
            Self::IndexBeyondData { indexed, records } => {
                write!(f, "index lists {indexed} messages, data holds {records}")
            }
            Self::UnindexedRecords { indexed, records } => {
                write!(f, "{} records past the {indexed} indexed", records - indexed)
            }
            Self::SentinelMismatch {
                sentinel,
                data_size,
            } => write!(f, "sentinel says {sentinel} bytes, data file has {data_size}"),
        }
    }
}

impl Problem {
    fn from_stop(stop: ScanStop) -> Option<Self> {
        match stop {
            ScanStop::End => None,
            ScanStop::TornHeader { offset } => Some(Self::TornHeader { offset }),
            ScanStop::BadMagic { offset } => Some(Self::BadMagic { offset }),
            ScanStop::TornPayload { offset } => Some(Self::TornPayload { offset }),
            ScanStop::CrcMismatch { offset } => Some(Self::CrcMismatch { offset }),
        }
    }
}

/// What [`inspect_segment`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentReport {
    /// Segment epoch.
    pub epoch: u32,
    /// Data file size.
    pub data_size: u64,
    /// End of the valid record prefix.
    pub valid_end: u64,
    /// Valid records found by scanning.
    pub records: u32,
    /// Messages listed by the index, when it could be read.
    pub indexed: Option<u32>,
    /// Whether the index carries the closing sentinel.
    pub closed: bool,
    /// Defects, in file order.
    pub problems: Vec<Problem>,
}

impl SegmentReport {
    /// Returns whether no defect was found.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Size of one segment's files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFile {
    /// Segment epoch.
    pub epoch: u32,
    /// Data file size.
    pub data_size: u64,
    /// Index file size, if present.
    pub index_size: Option<u64>,
}

/// Lists every segment with its file sizes.
pub fn segment_files(journal: &Journal) -> JournalResult<Vec<SegmentFile>> {
    let dir = journal.dir();
    let mut files = Vec::new();
    for epoch in journal.store().epochs()? {
        let data_size = match fs::metadata(dir.segment_path(epoch)) {
            Ok(meta) => meta.len(),
            // Reclaimed while listing.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(JournalError::segment(FileFault::Open, epoch, e)),
        };
        let index_size = fs::metadata(dir.index_path(epoch)).ok().map(|m| m.len());
        files.push(SegmentFile {
            epoch,
            data_size,
            index_size,
        });
    }
    Ok(files)
}

/// Scans one segment and cross-checks its index.
///
/// # Errors
///
/// Only I/O failures are errors; damage is reported in the
/// [`SegmentReport`].
pub fn inspect_segment(journal: &Journal, epoch: u32) -> JournalResult<SegmentReport> {
    let dir = journal.dir();
    let data = FileBackend::open_read_only(&dir.segment_path(epoch))
        .map_err(|e| JournalError::segment(FileFault::Open, epoch, e))?;
    let data_size = fs::metadata(dir.segment_path(epoch))
        .map_err(|e| JournalError::segment(FileFault::Seek, epoch, e))?
        .len();

    let mut report = SegmentReport {
        epoch,
        data_size,
        valid_end: 0,
        records: 0,
        indexed: None,
        closed: false,
        problems: Vec::new(),
    };

    let mut scanner = match RecordScanner::new(epoch, &data) {
        Ok(scanner) => scanner,
        Err(e) if e.kind() == ErrorKind::SegmentCorrupt => {
            report.problems.push(Problem::BadHeader(e.to_string()));
            return Ok(report);
        }
        Err(e) => return Err(e),
    };
    let mut scanned = Vec::new();
    for record in scanner.by_ref() {
        let record = record?;
        scanned.push((record.offset, record.header.length));
    }
    report.valid_end = scanner.valid_end();
    report.records = u32::try_from(scanned.len()).unwrap_or(u32::MAX);
    if let Some(problem) = scanner.stop().and_then(Problem::from_stop) {
        report.problems.push(problem);
    }

    if !dir.index_path(epoch).exists() {
        report.problems.push(Problem::MissingIndex);
        return Ok(report);
    }
    let index = FileBackend::open_read_only(&dir.index_path(epoch))
        .map_err(|e| JournalError::index(FileFault::Open, epoch, e))?;
    let index = SegmentIndex::new(epoch, index);
    if let Err(problem) = check_index(&index, &scanned, &mut report) {
        report.problems.push(problem);
    }
    Ok(report)
}

fn check_index(
    index: &SegmentIndex,
    scanned: &[(u64, u32)],
    report: &mut SegmentReport,
) -> Result<(), Problem> {
    let unreadable = |e: JournalError| Problem::UnreadableIndex(e.to_string());
    let state = index.state().map_err(unreadable)?;
    report.indexed = Some(state.count);
    report.closed = state.closed;

    for sequence in 1..=state.count {
        let Some(&(offset, length)) = scanned.get(sequence as usize - 1) else {
            return Err(Problem::IndexBeyondData {
                indexed: state.count,
                records: report.records,
            });
        };
        let entry = index.entry(sequence).map_err(unreadable)?;
        if entry.offset != offset || entry.length != length {
            return Err(Problem::IndexMismatch {
                sequence,
                scanned: offset,
                indexed: entry.offset,
            });
        }
    }
    if report.records > state.count {
        report.problems.push(Problem::UnindexedRecords {
            indexed: state.count,
            records: report.records,
        });
    }
    if state.closed && state.data_end != report.data_size {
        return Err(Problem::SentinelMismatch {
            sentinel: state.data_end,
            data_size: report.data_size,
        });
    }
    Ok(())
}

/// Truncates a segment to its valid records and rewrites its index.
///
/// Older segments get a closed index; the newest stays open for the
/// writer. Runs under `writer.lock`.
pub fn repair_segment(journal: &Journal, epoch: u32) -> JournalResult<RebuildReport> {
    let lock = journal.dir().writer_lock()?;
    let _guard = lock.acquire()?;

    let store = journal.store();
    let close = epoch < store.newest_epoch()?;
    let report = store.rebuild_index(epoch, close)?;
    if report.truncated > 0 {
        warn!(epoch, truncated = report.truncated, "repaired segment");
    }
    Ok(report)
}
