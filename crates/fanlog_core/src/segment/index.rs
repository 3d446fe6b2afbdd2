//! Per-segment index files.
//!
//! An index is a direct offset table: the entry for sequence `s` lives at
//! byte `(s - 1) * 16`. A closed segment's index ends with one sentinel
//! entry whose sequence is 0 and whose offset is the final data length.

use crate::error::{FileFault, JournalError, JournalResult};
use crate::segment::record::{RecordHeader, SegmentHeader};
use fanlog_storage::{FileBackend, StorageBackend};

/// One index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Message sequence, or 0 for the closing sentinel.
    pub sequence: u32,
    /// Offset of the record header in the data file.
    pub offset: u64,
    /// Payload length.
    pub length: u32,
}

impl IndexEntry {
    /// Encoded size in bytes.
    pub const SIZE: usize = 16;

    /// Creates the sentinel closing a segment whose data is `data_len` bytes.
    #[must_use]
    pub const fn sentinel(data_len: u64) -> Self {
        Self {
            sequence: 0,
            offset: data_len,
            length: 0,
        }
    }

    /// Returns whether this is the closing sentinel.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.sequence == 0
    }

    /// Byte offset just past the record this entry points at, or `None`
    /// if a corrupt offset would overflow.
    #[must_use]
    pub fn record_end(&self) -> Option<u64> {
        self.offset
            .checked_add(RecordHeader::SIZE as u64)?
            .checked_add(u64::from(self.length))
    }

    /// Encodes the entry.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sequence.to_le_bytes());
        buf[4..12].copy_from_slice(&self.offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Decodes an entry.
    #[must_use]
    pub fn decode(data: &[u8; Self::SIZE]) -> Self {
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&data[4..12]);
        Self {
            sequence: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            offset: u64::from_le_bytes(offset),
            length: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
        }
    }
}

/// Summary of an index as of its last refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexState {
    /// Committed messages.
    pub count: u32,
    /// Whether the closing sentinel is present.
    pub closed: bool,
    /// End of the last committed record (the sentinel offset when closed).
    pub data_end: u64,
}

/// An open index file.
#[derive(Debug)]
pub struct SegmentIndex {
    epoch: u32,
    backend: FileBackend,
}

impl SegmentIndex {
    /// Wraps an opened index backend.
    #[must_use]
    pub fn new(epoch: u32, backend: FileBackend) -> Self {
        Self { epoch, backend }
    }

    /// Returns the epoch this index belongs to.
    #[must_use]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Returns the index file size as of the last refresh.
    pub fn byte_len(&self) -> JournalResult<u64> {
        self.backend
            .size()
            .map_err(|e| JournalError::index(FileFault::Seek, self.epoch, e))
    }

    /// Returns whether the index file was replaced or removed since this
    /// handle opened it.
    pub fn replaced(&self) -> JournalResult<bool> {
        self.backend
            .is_replaced()
            .map_err(|e| JournalError::index(FileFault::Open, self.epoch, e))
    }

    /// Re-reads the file size and returns the derived state.
    ///
    /// A trailing partial entry is ignored: it belongs to an append still in
    /// progress or torn by a crash.
    pub fn refresh(&mut self) -> JournalResult<IndexState> {
        self.backend
            .refresh()
            .map_err(|e| JournalError::index(FileFault::Seek, self.epoch, e))?;
        self.state()
    }

    /// Returns the state as of the last refresh.
    pub fn state(&self) -> JournalResult<IndexState> {
        let entries = self.entry_count()?;
        if entries == 0 {
            return Ok(IndexState {
                count: 0,
                closed: false,
                data_end: SegmentHeader::SIZE as u64,
            });
        }

        let last = self.read_slot(entries - 1)?;
        if last.is_sentinel() {
            let count = u32::try_from(entries - 1)
                .map_err(|_| JournalError::index_corrupt(self.epoch, "index too large"))?;
            return Ok(IndexState {
                count,
                closed: true,
                data_end: last.offset,
            });
        }

        let count = u32::try_from(entries)
            .map_err(|_| JournalError::index_corrupt(self.epoch, "index too large"))?;
        if last.sequence != count {
            return Err(JournalError::index_corrupt(
                self.epoch,
                format!("slot {count} holds sequence {}", last.sequence),
            ));
        }
        let data_end = last
            .record_end()
            .ok_or_else(|| JournalError::index_corrupt(self.epoch, "entry offset overflows"))?;
        Ok(IndexState {
            count,
            closed: false,
            data_end,
        })
    }

    /// Reads the entry for `sequence`, validating that it matches its slot.
    ///
    /// # Errors
    ///
    /// - `IllegalLogId` if `sequence` is 0 or not yet committed
    /// - `IndexCorrupt` if the slot holds another sequence
    pub fn entry(&self, sequence: u32) -> JournalResult<IndexEntry> {
        let id = crate::types::LogId::new(self.epoch, sequence);
        if sequence == 0 {
            return Err(JournalError::illegal_log_id(id, "sequence 0 names no message"));
        }
        if u64::from(sequence) > self.entry_count()? {
            return Err(JournalError::illegal_log_id(id, "not yet written"));
        }
        let entry = self.read_slot(u64::from(sequence) - 1)?;
        if entry.is_sentinel() {
            return Err(JournalError::illegal_log_id(id, "past the end of a closed segment"));
        }
        if entry.sequence != sequence {
            return Err(JournalError::index_corrupt(
                self.epoch,
                format!("slot {sequence} holds sequence {}", entry.sequence),
            ));
        }
        if entry.record_end().is_none() {
            return Err(JournalError::index_corrupt(self.epoch, "entry offset overflows"));
        }
        Ok(entry)
    }

    /// Appends an entry.
    pub fn append(&mut self, entry: &IndexEntry) -> JournalResult<()> {
        self.backend
            .append(&entry.encode())
            .map_err(|e| JournalError::index(FileFault::Write, self.epoch, e))?;
        Ok(())
    }

    /// Syncs the index file.
    pub fn sync(&mut self) -> JournalResult<()> {
        self.backend
            .sync()
            .map_err(|e| JournalError::index(FileFault::Write, self.epoch, e))
    }

    /// Cuts off a trailing partial entry, returning the bytes removed.
    pub fn trim_partial(&mut self) -> JournalResult<u64> {
        let len = self.byte_len()?;
        let whole = len - len % IndexEntry::SIZE as u64;
        if whole != len {
            self.backend
                .truncate(whole)
                .map_err(|e| JournalError::index(FileFault::Seek, self.epoch, e))?;
        }
        Ok(len - whole)
    }

    fn entry_count(&self) -> JournalResult<u64> {
        Ok(self.byte_len()? / IndexEntry::SIZE as u64)
    }

    fn read_slot(&self, slot: u64) -> JournalResult<IndexEntry> {
        let bytes = self
            .backend
            .read_at(slot * IndexEntry::SIZE as u64, IndexEntry::SIZE)
            .map_err(|e| JournalError::index(FileFault::Read, self.epoch, e))?;
        let mut raw = [0u8; IndexEntry::SIZE];
        raw.copy_from_slice(&bytes);
        Ok(IndexEntry::decode(&raw))
    }
}
