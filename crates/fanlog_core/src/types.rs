//! Core type definitions for fanlog.

use crate::error::{JournalError, JournalResult};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Position of a message in the journal.
///
/// A log id is the pair `(epoch, sequence)`: the epoch names the segment file
/// and the sequence numbers messages inside it, starting at 1. The id
/// `{epoch, 0}` is the position just before the first message of `epoch`.
///
/// Ids are totally ordered by epoch, then sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogId {
    /// Segment epoch.
    pub epoch: u32,
    /// Sequence within the epoch.
    pub sequence: u32,
}

impl LogId {
    /// Size of the fixed-width binary encoding.
    pub const ENCODED_SIZE: usize = 8;

    /// Creates a new log id.
    #[must_use]
    pub const fn new(epoch: u32, sequence: u32) -> Self {
        Self { epoch, sequence }
    }

    /// Returns the position before the first message of `epoch`.
    #[must_use]
    pub const fn epoch_start(epoch: u32) -> Self {
        Self { epoch, sequence: 0 }
    }

    /// Returns whether this id names a message rather than a position
    /// before the start of an epoch.
    #[must_use]
    pub const fn is_message(self) -> bool {
        self.sequence != 0
    }

    /// Encodes the id as `epoch (u32 LE) | sequence (u32 LE)`.
    #[must_use]
    pub fn encode(self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        buf[0..4].copy_from_slice(&self.epoch.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf
    }

    /// Decodes an id previously produced by [`LogId::encode`].
    ///
    /// # Errors
    ///
    /// Returns `IllegalLogId` if `data` is not exactly eight bytes.
    pub fn decode(data: &[u8]) -> JournalResult<Self> {
        let bytes: [u8; Self::ENCODED_SIZE] = data.try_into().map_err(|_| {
            JournalError::illegal_log_id(
                Self::default(),
                format!("encoded log id must be 8 bytes, got {}", data.len()),
            )
        })?;
        Ok(Self {
            epoch: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            sequence: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{:08x}", self.epoch, self.sequence)
    }
}

impl FromStr for LogId {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || JournalError::illegal_log_id(Self::default(), format!("cannot parse {s:?}"));
        let (epoch, sequence) = s.split_once(':').ok_or_else(invalid)?;
        let epoch = u32::from_str_radix(epoch, 16).map_err(|_| invalid())?;
        let sequence = u32::from_str_radix(sequence, 16).map_err(|_| invalid())?;
        Ok(Self { epoch, sequence })
    }
}

/// Durability level applied to every append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Safety {
    /// No forced flush or sync.
    Unsafe = 0,
    /// Data is handed to the OS on every append and synced periodically.
    #[default]
    AlmostSafe = 1,
    /// Data and index are synced before every append returns.
    Safe = 2,
}

impl Safety {
    /// Returns the raw level.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a raw level.
    #[must_use]
    pub const fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Unsafe),
            1 => Some(Self::AlmostSafe),
            2 => Some(Self::Safe),
            _ => None,
        }
    }
}

/// Where a newly registered subscriber starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Replay everything still retained in the journal.
    Begin,
    /// Only messages written after registration.
    End,
}

/// Wall-clock time recorded in a message header.
///
/// Informational only: ordering is defined by [`LogId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    /// Whole seconds since the Unix epoch.
    pub seconds: u32,
    /// Microseconds within the second.
    pub micros: u32,
}

impl Timestamp {
    /// Returns the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Converts back to a `SystemTime`.
    #[must_use]
    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH
            + Duration::from_secs(u64::from(self.seconds))
            + Duration::from_micros(u64::from(self.micros))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        // Times before 1970 or past 2106 saturate.
        let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            seconds: u32::try_from(since.as_secs()).unwrap_or(u32::MAX),
            micros: since.subsec_micros(),
        }
    }
}

/// A message read back from the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Where the message lives.
    pub id: LogId,
    /// Time recorded when the message was written.
    pub timestamp: Timestamp,
    /// The opaque payload.
    pub payload: Vec<u8>,
}

impl Message {
    /// Returns the payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ordering_is_epoch_then_sequence() {
        assert!(LogId::new(0, 9) < LogId::new(1, 0));
        assert!(LogId::new(1, 1) < LogId::new(1, 2));
        assert_eq!(LogId::new(3, 3).max(LogId::new(2, 99)), LogId::new(3, 3));
    }

    #[test]
    fn decode_rejects_wrong_width() {
        assert!(LogId::decode(&[0u8; 7]).is_err());
        assert!(LogId::decode(&[0u8; 9]).is_err());
    }

    #[test]
    fn display_and_parse() {
        let id = LogId::new(0x1a, 0x2b);
        assert_eq!(id.to_string(), "0000001a:0000002b");
        assert_eq!("0000001a:0000002b".parse::<LogId>().unwrap(), id);
        assert!("nonsense".parse::<LogId>().is_err());
    }

    #[test]
    fn safety_levels() {
        for level in 0..3 {
            assert_eq!(Safety::from_u8(level).unwrap().as_u8(), level);
        }
        assert!(Safety::from_u8(3).is_none());
        assert!(Safety::Unsafe < Safety::Safe);
    }

    #[test]
    fn timestamp_round_trip_keeps_micros() {
        let time = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_000);
        let ts = Timestamp::from(time);
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.micros, 123_456);
        assert_eq!(ts.to_system_time(), time);
    }

    proptest! {
        #[test]
        fn encode_decode_is_identity(epoch in any::<u32>(), sequence in any::<u32>()) {
            let id = LogId::new(epoch, sequence);
            prop_assert_eq!(LogId::decode(&id.encode()).unwrap(), id);
        }

        #[test]
        fn encoding_is_little_endian(epoch in any::<u32>(), sequence in any::<u32>()) {
            let bytes = LogId::new(epoch, sequence).encode();
            prop_assert_eq!(&bytes[..4], &epoch.to_le_bytes()[..]);
            prop_assert_eq!(&bytes[4..], &sequence.to_le_bytes()[..]);
        }
    }
}
