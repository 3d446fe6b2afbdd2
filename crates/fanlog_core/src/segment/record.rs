//! Segment header and message record codecs.

use crate::error::{JournalError, JournalResult};
use crate::types::Timestamp;

/// Magic bytes opening every segment data file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"FLSG";

/// Current segment format version.
pub const SEGMENT_VERSION: u16 = 1;

/// Magic number opening every message record.
pub const RECORD_MAGIC: u32 = 0x464C_5243;

/// Fixed header at the start of a segment data file.
///
/// ```text
/// | magic (4) | version (2) | reserved (2) | epoch (4) | reserved (4) |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Epoch the segment belongs to.
    pub epoch: u32,
}

impl SegmentHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 16;

    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        buf[4..6].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.epoch.to_le_bytes());
        buf
    }

    /// Decodes and validates the header of the segment for `epoch`.
    ///
    /// # Errors
    ///
    /// Returns `SegmentCorrupt` on a short buffer, bad magic, unsupported
    /// version, or an epoch that does not match the file name.
    pub fn decode(epoch: u32, data: &[u8]) -> JournalResult<Self> {
        if data.len() < Self::SIZE {
            return Err(JournalError::segment_corrupt(epoch, "segment header truncated"));
        }
        if data[0..4] != SEGMENT_MAGIC {
            return Err(JournalError::segment_corrupt(epoch, "invalid segment magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > SEGMENT_VERSION {
            return Err(JournalError::segment_corrupt(
                epoch,
                format!("unsupported segment version: {version}"),
            ));
        }
        let stored = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        if stored != epoch {
            return Err(JournalError::segment_corrupt(
                epoch,
                format!("header names epoch {stored:08x}"),
            ));
        }
        Ok(Self { epoch })
    }
}

/// Header preceding every message payload.
///
/// ```text
/// | magic (4) | tv_sec (4) | tv_usec (4) | length (4) | crc32 (4) | payload (N) |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Time the message was written.
    pub timestamp: Timestamp,
    /// Payload length.
    pub length: u32,
    /// CRC32 of the payload.
    pub crc: u32,
}

impl RecordHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 20;

    /// Decodes a record header read at `offset` of the segment for `epoch`.
    ///
    /// # Errors
    ///
    /// Returns `SegmentCorrupt` on a short buffer or bad magic.
    pub fn decode(epoch: u32, offset: u64, data: &[u8]) -> JournalResult<Self> {
        if data.len() < Self::SIZE {
            return Err(JournalError::segment_corrupt(
                epoch,
                format!("record header at {offset} truncated"),
            ));
        }
        let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        if word(0) != RECORD_MAGIC {
            return Err(JournalError::segment_corrupt(
                epoch,
                format!("bad record magic at {offset}"),
            ));
        }
        Ok(Self {
            timestamp: Timestamp {
                seconds: word(4),
                micros: word(8),
            },
            length: word(12),
            crc: word(16),
        })
    }

    /// Total on-disk size of the record this header opens.
    #[must_use]
    pub fn record_len(&self) -> u64 {
        Self::SIZE as u64 + u64::from(self.length)
    }

    /// Checks `payload` against the stored checksum.
    ///
    /// # Errors
    ///
    /// Returns `SegmentCorrupt` on a length or CRC mismatch.
    pub fn verify(&self, epoch: u32, offset: u64, payload: &[u8]) -> JournalResult<()> {
        if payload.len() != self.length as usize {
            return Err(JournalError::segment_corrupt(
                epoch,
                format!("record at {offset} truncated"),
            ));
        }
        if crc32fast::hash(payload) != self.crc {
            return Err(JournalError::segment_corrupt(
                epoch,
                format!("checksum mismatch in record at {offset}"),
            ));
        }
        Ok(())
    }
}

/// Encodes a complete record: header followed by the payload.
#[must_use]
pub fn encode_record(payload: &[u8], timestamp: Timestamp) -> Vec<u8> {
    let length = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let mut buf = Vec::with_capacity(RecordHeader::SIZE + payload.len());
    buf.extend_from_slice(&RECORD_MAGIC.to_le_bytes());
    buf.extend_from_slice(&timestamp.seconds.to_le_bytes());
    buf.extend_from_slice(&timestamp.micros.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}
