//! Journal writers.

use crate::error::JournalResult;
use crate::journal::Journal;
use crate::segment::{AppendPolicy, Appender};
use crate::types::{LogId, Timestamp};
use parking_lot::Mutex;
use std::time::SystemTime;

/// Appends messages to a journal.
///
/// A writer can be shared between threads; appends from one writer, from
/// several writers, and from other processes are all serialized by the
/// journal's `writer.lock`.
#[derive(Debug)]
pub struct Writer {
    journal: Journal,
    appender: Mutex<Appender>,
}

impl Writer {
    pub(crate) fn open(journal: Journal, policy: AppendPolicy) -> JournalResult<Self> {
        let appender = Appender::open(journal.store().clone(), policy)?;
        Ok(Self {
            journal,
            appender: Mutex::new(appender),
        })
    }

    /// Returns the journal this writer appends to.
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Appends `payload` stamped with the current time.
    ///
    /// # Errors
    ///
    /// - `IllegalWrite` if the payload does not fit a record
    /// - `SegmentWrite`/`IndexWrite` and related kinds on I/O failure
    pub fn write(&self, payload: &[u8]) -> JournalResult<LogId> {
        self.append(payload, Timestamp::now())
    }

    /// Appends `payload` with an explicit timestamp.
    ///
    /// The timestamp is stored with the message only; ids still follow
    /// append order.
    pub fn write_message(&self, payload: &[u8], at: SystemTime) -> JournalResult<LogId> {
        self.append(payload, Timestamp::from(at))
    }

    /// Forces everything appended so far to disk.
    pub fn sync(&self) -> JournalResult<()> {
        self.appender.lock().sync()
    }

    /// Closes the writer, syncing pending appends unless the journal is
    /// `Unsafe`.
    pub fn close(self) -> JournalResult<()> {
        self.appender.into_inner().close()
    }

    fn append(&self, payload: &[u8], timestamp: Timestamp) -> JournalResult<LogId> {
        let appended = self.appender.lock().append(payload, timestamp)?;
        if appended.rolled_over {
            self.journal.reclaim_consumed();
        }
        Ok(appended.id)
    }
}
