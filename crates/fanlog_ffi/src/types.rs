//! Type definitions for FFI.

use crate::buffer::FanlogBuffer;
use fanlog_core::{LogId, Message, Position};

/// An opaque journal handle.
///
/// This is a pointer to the internal handle structure.
/// Never dereference or modify directly.
#[repr(C)]
pub struct FanlogCtx {
    _private: [u8; 0],
}

/// `whence` value registering a subscriber at the oldest retained message.
pub const FANLOG_BEGIN: i32 = 0;
/// `whence` value registering a subscriber at the writer head.
pub const FANLOG_END: i32 = 1;

/// Maps a `whence` value to a position.
pub(crate) fn position_from(whence: i32) -> Option<Position> {
    match whence {
        FANLOG_BEGIN => Some(Position::Begin),
        FANLOG_END => Some(Position::End),
        _ => None,
    }
}

/// A log id.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanlogId {
    /// Segment epoch.
    pub epoch: u32,
    /// Sequence within the epoch.
    pub sequence: u32,
}

impl From<LogId> for FanlogId {
    fn from(id: LogId) -> Self {
        Self {
            epoch: id.epoch,
            sequence: id.sequence,
        }
    }
}

impl From<FanlogId> for LogId {
    fn from(id: FanlogId) -> Self {
        LogId::new(id.epoch, id.sequence)
    }
}

/// A message read from the journal.
///
/// Release with `fanlog_free_message`.
#[repr(C)]
pub struct FanlogMessage {
    /// Seconds part of the write timestamp.
    pub tv_sec: u32,
    /// Microseconds part of the write timestamp.
    pub tv_usec: u32,
    /// Message payload.
    pub payload: FanlogBuffer,
}

impl From<Message> for FanlogMessage {
    fn from(message: Message) -> Self {
        Self {
            tv_sec: message.timestamp.seconds,
            tv_usec: message.timestamp.micros,
            payload: FanlogBuffer::from_vec(message.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_conversion() {
        let id = LogId::new(3, 9);
        let ffi = FanlogId::from(id);
        assert_eq!(ffi, FanlogId { epoch: 3, sequence: 9 });
        assert_eq!(LogId::from(ffi), id);
    }

    #[test]
    fn whence_values() {
        assert_eq!(position_from(FANLOG_BEGIN), Some(Position::Begin));
        assert_eq!(position_from(FANLOG_END), Some(Position::End));
        assert_eq!(position_from(7), None);
    }
}
