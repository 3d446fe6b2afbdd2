//! Sequential record scanner over a segment data file.
//!
//! Used to rebuild a lost index and to analyze segments. Unlike reads
//! through the index, the scanner does not stop with an error on a bad
//! record: it ends the iteration and records why in [`ScanStop`], so the
//! caller knows where the valid prefix of the file ends.

use crate::error::{FileFault, JournalError, JournalResult};
use crate::segment::record::{RecordHeader, SegmentHeader};
use fanlog_storage::{FileBackend, StorageBackend};

/// A record found by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedRecord {
    /// Offset of the record header.
    pub offset: u64,
    /// The decoded header.
    pub header: RecordHeader,
}

/// Why a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    /// Clean end of file.
    End,
    /// Fewer than a header's worth of bytes remain.
    TornHeader {
        /// Offset of the partial header.
        offset: u64,
    },
    /// A record header did not start with the record magic.
    BadMagic {
        /// Offset of the bad header.
        offset: u64,
    },
    /// The payload extends past the end of the file.
    TornPayload {
        /// Offset of the record header.
        offset: u64,
    },
    /// The payload does not match its checksum.
    CrcMismatch {
        /// Offset of the record header.
        offset: u64,
    },
}

impl ScanStop {
    /// Returns whether the scan reached the end of the file cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::End)
    }
}

/// Iterates over the records of one segment data file.
///
/// Yields `Err` only for I/O failures.
pub struct RecordScanner<'a> {
    epoch: u32,
    backend: &'a FileBackend,
    size: u64,
    offset: u64,
    stop: Option<ScanStop>,
}

impl<'a> RecordScanner<'a> {
    /// Creates a scanner starting after the segment header.
    ///
    /// # Errors
    ///
    /// Returns `SegmentCorrupt` if the header is missing or invalid.
    pub fn new(epoch: u32, backend: &'a FileBackend) -> JournalResult<Self> {
        let size = backend
            .size()
            .map_err(|e| JournalError::segment(FileFault::Seek, epoch, e))?;
        if size < SegmentHeader::SIZE as u64 {
            return Err(JournalError::segment_corrupt(epoch, "segment header truncated"));
        }
        let header = backend
            .read_at(0, SegmentHeader::SIZE)
            .map_err(|e| JournalError::segment(FileFault::Read, epoch, e))?;
        SegmentHeader::decode(epoch, &header)?;

        Ok(Self {
            epoch,
            backend,
            size,
            offset: SegmentHeader::SIZE as u64,
            stop: None,
        })
    }

    /// End of the valid prefix scanned so far.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.offset
    }

    /// Total file size seen by the scanner.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.size
    }

    /// Why the scan ended, once it has.
    #[must_use]
    pub fn stop(&self) -> Option<ScanStop> {
        self.stop
    }

    fn read(&self, offset: u64, len: usize) -> JournalResult<Vec<u8>> {
        self.backend
            .read_at(offset, len)
            .map_err(|e| JournalError::segment(FileFault::Read, self.epoch, e))
    }

    fn next_record(&mut self) -> JournalResult<Result<ScannedRecord, ScanStop>> {
        let offset = self.offset;
        let remaining = self.size - offset;
        if remaining == 0 {
            return Ok(Err(ScanStop::End));
        }
        if remaining < RecordHeader::SIZE as u64 {
            return Ok(Err(ScanStop::TornHeader { offset }));
        }

        let raw = self.read(offset, RecordHeader::SIZE)?;
        let Ok(header) = RecordHeader::decode(self.epoch, offset, &raw) else {
            return Ok(Err(ScanStop::BadMagic { offset }));
        };
        if header.record_len() > remaining {
            return Ok(Err(ScanStop::TornPayload { offset }));
        }

        let payload = self.read(offset + RecordHeader::SIZE as u64, header.length as usize)?;
        if header.verify(self.epoch, offset, &payload).is_err() {
            return Ok(Err(ScanStop::CrcMismatch { offset }));
        }

        self.offset += header.record_len();
        Ok(Ok(ScannedRecord { offset, header }))
    }
}

impl Iterator for RecordScanner<'_> {
    type Item = JournalResult<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() {
            return None;
        }
        match self.next_record() {
            Ok(Ok(record)) => Some(Ok(record)),
            Ok(Err(stop)) => {
                self.stop = Some(stop);
                None
            }
            Err(e) => {
                self.stop = Some(ScanStop::End);
                Some(Err(e))
            }
        }
    }
}
