//! # fanlog Core
//!
//! Disk-backed, append-only journal with independent subscribers.
//!
//! Writers append opaque messages to a directory of fixed-capacity
//! segments. Every subscriber keeps a durable checkpoint and reads the
//! messages after it in batches; a segment is deleted once all subscribers
//! have checkpointed past it.
//!
//! This crate provides:
//! - Segment storage with per-segment indexes and crash recovery
//! - Writers serialized across threads and processes
//! - Per-subscriber readers with at-least-once delivery
//! - Reclamation of fully consumed segments
//! - Inspection and repair of damaged segments
//!
//! ## Directory layout
//!
//! ```text
//! <journal>/
//! ├─ metastore            persisted settings and current epoch
//! ├─ writer.lock          serializes appends
//! ├─ meta.lock            serializes subscriber changes and reclamation
//! ├─ 00000000             segment data for epoch 0
//! ├─ 00000000.idx         its index
//! ├─ cp.<hex name>        a subscriber's checkpoint
//! └─ cp.<hex name>.lock   held by the subscriber's open reader
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use fanlog_core::{Journal, JournalConfig, Position};
//!
//! # fn main() -> fanlog_core::JournalResult<()> {
//! let journal = Journal::open_or_create("/tmp/events", &JournalConfig::default())?;
//! journal.add_subscriber("indexer", Position::Begin)?;
//!
//! let writer = journal.open_writer()?;
//! writer.write(b"hello")?;
//!
//! let mut reader = journal.open_reader("indexer")?;
//! let interval = reader.read_interval()?;
//! for id in interval.ids() {
//!     let message = reader.read_message(id)?;
//!     println!("{id}: {} bytes", message.len());
//! }
//! if !interval.is_empty() {
//!     reader.checkpoint(interval.last)?;
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
pub mod context;
mod dir;
mod error;
pub mod inspect;
mod journal;
mod meta;
mod reader;
mod reclaim;
pub mod segment;
mod types;
mod writer;

pub use checkpoint::CheckpointStore;
pub use config::{
    JournalConfig, DEFAULT_FILE_MODE, DEFAULT_MAX_BATCH, DEFAULT_SEGMENT_SIZE,
    DEFAULT_SYNC_INTERVAL,
};
pub use context::Context;
pub use dir::{DirLock, JournalDir, LockGuard};
pub use error::{ErrorKind, FileFault, JournalError, JournalResult};
pub use journal::{InitOutcome, Journal};
pub use meta::{Metastore, META_SIZE};
pub use reader::{ReadInterval, Reader};
pub use types::{LogId, Message, Position, Safety, Timestamp};
pub use writer::Writer;

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
