//! Handle with a last-error surface.
//!
//! [`Context`] wraps a journal path and moves through the states
//! `New -> Writer | Reader -> Closed`. Each operation still returns a
//! `Result`, and additionally records its outcome so that callers ported
//! from errno-style APIs (and the C ABI) can query `err()`, `err_string()`
//! and `errno()` afterwards.

use crate::config::JournalConfig;
use crate::error::{ErrorKind, JournalError, JournalResult};
use crate::journal::{InitOutcome, Journal};
use crate::reader::{ReadInterval, Reader};
use crate::types::{LogId, Message, Position, Safety};
use crate::writer::Writer;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug)]
enum State {
    New,
    Writer(Writer),
    Reader(Reader),
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Writer(_) => "writer",
            Self::Reader(_) => "reader",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone)]
struct LastError {
    kind: ErrorKind,
    message: String,
    errno: i32,
}

/// A journal handle that remembers the last failure.
#[derive(Debug)]
pub struct Context {
    path: PathBuf,
    config: JournalConfig,
    journal: Option<Journal>,
    state: State,
    last_error: Option<LastError>,
}

impl Context {
    /// Creates a handle for the journal at `path`; nothing is touched on
    /// disk yet.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: JournalConfig::default(),
            journal: None,
            state: State::New,
            last_error: None,
        }
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sets the durability level used by [`Context::init`].
    pub fn alter_safety(&mut self, safety: Safety) -> JournalResult<()> {
        let result = self.require_new("alter safety").map(|()| {
            self.config.safety = safety;
        });
        self.track(result)
    }

    /// Sets the segment capacity used by [`Context::init`].
    pub fn alter_journal_size(&mut self, size: u64) -> JournalResult<()> {
        let result = self.require_new("alter journal size").map(|()| {
            self.config.segment_size = size;
        });
        self.track(result)
    }

    /// Sets the file mode used by [`Context::init`].
    pub fn alter_mode(&mut self, mode: u32) -> JournalResult<()> {
        let result = self.require_new("alter mode").map(|()| {
            self.config.file_mode = mode;
        });
        self.track(result)
    }

    /// Sets whether [`Context::init`] fails on an existing journal.
    pub fn set_fail_if_exists(&mut self, value: bool) {
        self.config.fail_if_exists = value;
    }

    /// Creates the journal on disk.
    ///
    /// # Errors
    ///
    /// Returns `IllegalInit` unless the handle is new.
    pub fn init(&mut self) -> JournalResult<InitOutcome> {
        let result = match self.state {
            State::New => Journal::init(&self.path, &self.config),
            _ => Err(JournalError::illegal_init(format!(
                "handle is {}",
                self.state.name()
            ))),
        };
        self.track(result)
    }

    /// Opens the handle for writing.
    ///
    /// # Errors
    ///
    /// Returns `IllegalOpen` unless the handle is new.
    pub fn open_writer(&mut self) -> JournalResult<()> {
        let result = self.try_open_writer();
        self.track(result)
    }

    /// Opens the handle as the reader of `subscriber`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalOpen` unless the handle is new, `InvalidSubscriber`
    /// if `subscriber` is not registered.
    pub fn open_reader(&mut self, subscriber: &str) -> JournalResult<()> {
        let result = self.try_open_reader(subscriber);
        self.track(result)
    }

    /// Appends a message.
    ///
    /// # Errors
    ///
    /// Returns `IllegalWrite` unless the handle is open for writing.
    pub fn write(&mut self, payload: &[u8]) -> JournalResult<LogId> {
        let result = match &self.state {
            State::Writer(writer) => writer.write(payload),
            other => Err(JournalError::illegal_write(format!("handle is {}", other.name()))),
        };
        self.track(result)
    }

    /// Appends a message with an explicit timestamp.
    pub fn write_message(&mut self, payload: &[u8], at: SystemTime) -> JournalResult<LogId> {
        let result = match &self.state {
            State::Writer(writer) => writer.write_message(payload, at),
            other => Err(JournalError::illegal_write(format!("handle is {}", other.name()))),
        };
        self.track(result)
    }

    /// Returns the next batch of unread messages.
    pub fn read_interval(&mut self) -> JournalResult<ReadInterval> {
        let result = self.reader("read interval").and_then(Reader::read_interval);
        self.track(result)
    }

    /// Reads one message.
    pub fn read_message(&mut self, id: LogId) -> JournalResult<Message> {
        let result = self
            .reader("read message")
            .and_then(|reader| reader.read_message(id));
        self.track(result)
    }

    /// Durably moves the reader's checkpoint to `id`.
    pub fn read_checkpoint(&mut self, id: LogId) -> JournalResult<()> {
        let result = self
            .reader("checkpoint")
            .and_then(|reader| reader.checkpoint(id));
        self.track(result)
    }

    /// Returns the oldest retained message id.
    pub fn first_log_id(&mut self) -> JournalResult<LogId> {
        let result = self.journal().and_then(|j| j.first_log_id());
        self.track(result)
    }

    /// Returns the newest message id.
    pub fn last_log_id(&mut self) -> JournalResult<LogId> {
        let result = self.journal().and_then(|j| j.last_log_id());
        self.track(result)
    }

    /// Returns the next message id after `id` within `[lo, hi]`.
    pub fn advance_id(&mut self, id: LogId, lo: LogId, hi: LogId) -> JournalResult<LogId> {
        let result = self.journal().and_then(|j| j.advance_id(id, lo, hi));
        self.track(result)
    }

    /// Registers a subscriber.
    pub fn add_subscriber(&mut self, name: &str, position: Position) -> JournalResult<LogId> {
        let result = self.journal().and_then(|j| j.add_subscriber(name, position));
        self.track(result)
    }

    /// Removes a subscriber.
    pub fn remove_subscriber(&mut self, name: &str) -> JournalResult<()> {
        let result = self.journal().and_then(|j| j.remove_subscriber(name));
        self.track(result)
    }

    /// Lists subscribers.
    pub fn list_subscribers(&mut self) -> JournalResult<Vec<String>> {
        let result = self.journal().and_then(|j| j.list_subscribers());
        self.track(result)
    }

    /// Returns a subscriber's durable checkpoint.
    pub fn get_checkpoint(&mut self, name: &str) -> JournalResult<LogId> {
        let result = self.journal().and_then(|j| j.get_checkpoint(name));
        self.track(result)
    }

    /// Counts subscribers that may still need `epoch`.
    pub fn pending_readers(&mut self, epoch: u32) -> JournalResult<usize> {
        let result = self.journal().and_then(|j| j.pending_readers(epoch));
        self.track(result)
    }

    /// Total bytes held by segment data files.
    pub fn raw_size(&mut self) -> JournalResult<u64> {
        let result = self.journal().and_then(|j| j.raw_size());
        self.track(result)
    }

    /// Closes the handle, syncing a writer and releasing a reader.
    pub fn close(&mut self) -> JournalResult<()> {
        let result = match std::mem::replace(&mut self.state, State::Closed) {
            State::Writer(writer) => writer.close(),
            State::Reader(reader) => {
                reader.close();
                Ok(())
            }
            State::New | State::Closed => Ok(()),
        };
        self.journal = None;
        self.track(result)
    }

    /// Returns the kind of the last failure, or `Success`.
    #[must_use]
    pub fn err(&self) -> ErrorKind {
        self.last_error
            .as_ref()
            .map_or(ErrorKind::Success, |e| e.kind)
    }

    /// Describes the last failure.
    #[must_use]
    pub fn err_string(&self) -> &str {
        self.last_error
            .as_ref()
            .map_or("success", |e| e.message.as_str())
    }

    /// Returns the OS error code of the last failure, or 0.
    #[must_use]
    pub fn errno(&self) -> i32 {
        self.last_error.as_ref().map_or(0, |e| e.errno)
    }

    fn try_open_writer(&mut self) -> JournalResult<()> {
        self.require_new("open writer")?;
        let writer = self.journal()?.open_writer()?;
        self.state = State::Writer(writer);
        Ok(())
    }

    fn try_open_reader(&mut self, subscriber: &str) -> JournalResult<()> {
        self.require_new("open reader")?;
        let reader = self.journal()?.open_reader(subscriber)?;
        self.state = State::Reader(reader);
        Ok(())
    }

    fn require_new(&self, operation: &str) -> JournalResult<()> {
        match self.state {
            State::New => Ok(()),
            _ => Err(JournalError::illegal_open(format!(
                "cannot {operation}: handle is {}",
                self.state.name()
            ))),
        }
    }

    fn journal(&mut self) -> JournalResult<&Journal> {
        if let State::Closed = self.state {
            return Err(JournalError::illegal_open("handle is closed"));
        }
        if self.journal.is_none() {
            self.journal = Some(Journal::open_with(&self.path, &self.config)?);
        }
        self.journal
            .as_ref()
            .ok_or_else(|| JournalError::illegal_open("journal not opened"))
    }

    fn reader(&mut self, operation: &str) -> JournalResult<&mut Reader> {
        match &mut self.state {
            State::Reader(reader) => Ok(reader),
            other => Err(JournalError::illegal_open(format!(
                "cannot {operation}: handle is {}",
                other.name()
            ))),
        }
    }

    fn track<T>(&mut self, result: JournalResult<T>) -> JournalResult<T> {
        self.last_error = result.as_ref().err().map(|e| LastError {
            kind: e.kind(),
            message: e.to_string(),
            errno: e.errno(),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_through_contexts() {
        let temp = tempdir().unwrap();
        let mut ctx = Context::new(temp.path());
        ctx.alter_journal_size(1 << 16).unwrap();
        ctx.alter_safety(Safety::Safe).unwrap();
        ctx.init().unwrap();
        ctx.add_subscriber("reader", Position::Begin).unwrap();
        ctx.close().unwrap();

        let mut writer = Context::new(temp.path());
        writer.open_writer().unwrap();
        let id = writer.write(b"hello").unwrap();
        writer.close().unwrap();

        let mut reader = Context::new(temp.path());
        reader.open_reader("reader").unwrap();
        let interval = reader.read_interval().unwrap();
        assert_eq!(interval.count, 1);
        assert_eq!(reader.read_message(id).unwrap().payload, b"hello");
        reader.read_checkpoint(id).unwrap();
        assert_eq!(reader.get_checkpoint("reader").unwrap(), id);
        assert_eq!(reader.err(), ErrorKind::Success);
    }

    #[test]
    fn state_violations_are_recorded() {
        let temp = tempdir().unwrap();
        let mut ctx = Context::new(temp.path());
        ctx.init().unwrap();

        assert_eq!(ctx.write(b"x").unwrap_err().kind(), ErrorKind::IllegalWrite);
        assert_eq!(ctx.err(), ErrorKind::IllegalWrite);

        ctx.open_writer().unwrap();
        assert_eq!(ctx.err(), ErrorKind::Success);
        assert_eq!(ctx.alter_mode(0o600).unwrap_err().kind(), ErrorKind::IllegalOpen);
        assert_eq!(ctx.init().unwrap_err().kind(), ErrorKind::IllegalInit);
        assert_eq!(
            ctx.read_interval().unwrap_err().kind(),
            ErrorKind::IllegalOpen
        );
        assert!(ctx.err_string().contains("writer"));

        ctx.close().unwrap();
        assert_eq!(ctx.open_writer().unwrap_err().kind(), ErrorKind::IllegalOpen);
    }

    #[test]
    fn os_errors_surface_through_errno() {
        let temp = tempdir().unwrap();
        let mut ctx = Context::new(temp.path().join("missing"));
        assert_eq!(ctx.open_writer().unwrap_err().kind(), ErrorKind::Open);
        assert_eq!(ctx.err(), ErrorKind::Open);
        assert_ne!(ctx.errno(), 0);
    }
}
