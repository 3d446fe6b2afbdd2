//! Segment storage.
//!
//! A segment is an append-only data file for one epoch, named by the epoch
//! in eight hex digits, with a companion `.idx` file. Segments roll over
//! when the next record would exceed the configured capacity.
//!
//! ## Data file format
//!
//! ```text
//! | segment header (16) | record | record | ... |
//! record: | magic (4) | tv_sec (4) | tv_usec (4) | length (4) | crc32 (4) | payload (N) |
//! ```
//!
//! ## Index format
//!
//! ```text
//! | sequence (4) | offset (8) | length (4) |   one 16-byte entry per message
//! | 0 (4) | data_len (8) | 0 (4) |              sentinel, closed segments only
//! ```

mod append;
mod index;
mod record;
mod scan;
mod store;

pub use append::{AppendPolicy, Appended, Appender};
pub use index::{IndexEntry, IndexState, SegmentIndex};
pub use record::{encode_record, RecordHeader, SegmentHeader, RECORD_MAGIC, SEGMENT_MAGIC};
pub use scan::{RecordScanner, ScanStop, ScannedRecord};
pub use store::{RebuildReport, SegmentStore};
