//! The journal root.

use crate::checkpoint::CheckpointStore;
use crate::config::JournalConfig;
use crate::dir::JournalDir;
use crate::error::{ErrorKind, JournalError, JournalResult};
use crate::meta::Metastore;
use crate::reader::Reader;
use crate::reclaim;
use crate::segment::{AppendPolicy, IndexState, SegmentHeader, SegmentStore};
use crate::types::{LogId, Message, Position};
use crate::writer::Writer;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`Journal::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// A new journal was created.
    Created,
    /// A journal already existed and `fail_if_exists` was off.
    AlreadyExists,
}

/// An open journal.
///
/// Cheap to clone; clones share the same segment and checkpoint stores.
/// Writers and readers are opened from it and keep it alive.
///
/// # Example
///
/// ```rust,ignore
/// use fanlog_core::{Journal, JournalConfig, Position};
///
/// Journal::init("/var/spool/events", &JournalConfig::default())?;
/// let journal = Journal::open("/var/spool/events")?;
/// journal.add_subscriber("indexer", Position::Begin)?;
///
/// let writer = journal.open_writer()?;
/// writer.write(b"hello")?;
///
/// let mut reader = journal.open_reader("indexer")?;
/// let interval = reader.read_interval()?;
/// for id in interval.ids() {
///     let message = reader.read_message(id)?;
/// }
/// reader.checkpoint(interval.last)?;
/// ```
#[derive(Debug, Clone)]
pub struct Journal {
    inner: Arc<JournalInner>,
}

#[derive(Debug)]
struct JournalInner {
    dir: Arc<JournalDir>,
    settings: Metastore,
    sync_interval: u32,
    store: Arc<SegmentStore>,
    checkpoints: CheckpointStore,
}

impl Journal {
    /// Creates a journal on disk.
    ///
    /// # Errors
    ///
    /// - `CreateExists` if the journal exists and `config.fail_if_exists`
    /// - `IllegalInit` if the configuration is unusable
    /// - `CreateMkdir`, `CreateMeta`, `CreatePathLen` or `NotADirectory`
    ///   if the files cannot be created
    pub fn init(path: impl AsRef<Path>, config: &JournalConfig) -> JournalResult<InitOutcome> {
        let path = path.as_ref();
        if config.segment_size <= SegmentHeader::SIZE as u64 {
            return Err(JournalError::illegal_init(format!(
                "segment size {} leaves no room for messages",
                config.segment_size
            )));
        }
        if config.max_batch == 0 {
            return Err(JournalError::illegal_init("max batch must be at least 1"));
        }

        let (dir, _) = JournalDir::create(path, config.file_mode, config.dir_mode())?;
        let meta_lock = dir.meta_lock()?;
        let _guard = meta_lock.acquire()?;

        if dir.is_initialized() {
            if config.fail_if_exists {
                return Err(JournalError::CreateExists {
                    path: path.to_path_buf(),
                });
            }
            return Ok(InitOutcome::AlreadyExists);
        }

        let dir = Arc::new(dir);
        let store = SegmentStore::new(dir.clone());
        if !dir.segment_path(0).exists() {
            store.create_segment(0)?;
        }
        // The metastore is written last: its presence marks the journal as
        // initialized.
        dir.save_meta(&Metastore::from_config(config))
            .map_err(|e| match e {
                JournalError::MetaOpen { path, source } => JournalError::CreateMeta { path, source },
                other => other,
            })?;

        info!(path = %path.display(), segment_size = config.segment_size, "journal created");
        Ok(InitOutcome::Created)
    }

    /// Opens an existing journal with default handle settings.
    ///
    /// # Errors
    ///
    /// - `Open`/`NotADirectory` if the directory is unusable
    /// - `MetaOpen` if the journal was never initialized
    pub fn open(path: impl AsRef<Path>) -> JournalResult<Self> {
        Self::open_with(path, &JournalConfig::default())
    }

    /// Opens an existing journal.
    ///
    /// Persisted settings come from the metastore; only the handle-local
    /// `sync_interval` is taken from `config`.
    ///
    /// # Errors
    ///
    /// Same as [`Journal::open`].
    pub fn open_with(path: impl AsRef<Path>, config: &JournalConfig) -> JournalResult<Self> {
        let mut dir = JournalDir::open(path.as_ref())?;
        let settings = dir.load_meta()?;
        dir.set_file_mode(settings.file_mode);

        let dir = Arc::new(dir);
        let store = Arc::new(SegmentStore::new(dir.clone()));
        let checkpoints = CheckpointStore::new(dir.clone())?;

        debug!(path = %path.as_ref().display(), epoch = settings.current_epoch, "journal opened");
        Ok(Self {
            inner: Arc::new(JournalInner {
                dir,
                settings,
                sync_interval: config.sync_interval,
                store,
                checkpoints,
            }),
        })
    }

    /// Initializes the journal if needed, then opens it.
    pub fn open_or_create(path: impl AsRef<Path>, config: &JournalConfig) -> JournalResult<Self> {
        let config = config.clone().fail_if_exists(false);
        Self::init(path.as_ref(), &config)?;
        Self::open_with(path, &config)
    }

    /// Returns the journal directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.dir.path()
    }

    /// Returns the settings persisted when the journal was created.
    ///
    /// `current_epoch` is as of open time; see [`Journal::last_log_id`].
    #[must_use]
    pub fn settings(&self) -> &Metastore {
        &self.inner.settings
    }

    /// Registers a subscriber and returns its starting checkpoint.
    ///
    /// `Begin` starts before the oldest retained message, `End` at the
    /// current writer head.
    ///
    /// # Errors
    ///
    /// Returns `SubscriberExists` if the name is taken.
    pub fn add_subscriber(&self, name: &str, position: Position) -> JournalResult<LogId> {
        let store = &self.inner.store;
        self.inner.checkpoints.register(name, || match position {
            Position::Begin => Ok(LogId::epoch_start(store.oldest_epoch()?)),
            Position::End => store.current_head(),
        })
    }

    /// Removes a subscriber and its checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSubscriber` if it is not registered.
    pub fn remove_subscriber(&self, name: &str) -> JournalResult<()> {
        self.inner.checkpoints.unregister(name)
    }

    /// Lists registered subscribers, sorted by name.
    pub fn list_subscribers(&self) -> JournalResult<Vec<String>> {
        self.inner.checkpoints.list()
    }

    /// Returns the durable checkpoint of any subscriber.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSubscriber` if it is not registered.
    pub fn get_checkpoint(&self, name: &str) -> JournalResult<LogId> {
        self.inner.checkpoints.get(name)
    }

    /// Opens a writer.
    ///
    /// Any number of writers may be open; appends are serialized.
    pub fn open_writer(&self) -> JournalResult<Writer> {
        Writer::open(self.clone(), self.append_policy())
    }

    /// Opens the reader of a subscriber.
    ///
    /// # Errors
    ///
    /// - `InvalidSubscriber` if it is not registered
    /// - `Lock` if another reader of the same subscriber is open
    pub fn open_reader(&self, subscriber: &str) -> JournalResult<Reader> {
        Reader::open(self.clone(), subscriber)
    }

    /// Returns the id of the oldest retained message, or the start of the
    /// oldest segment when the journal holds none.
    pub fn first_log_id(&self) -> JournalResult<LogId> {
        let start = LogId::epoch_start(self.inner.store.oldest_epoch()?);
        let head = self.last_log_id()?;
        match self.inner.store.advance(start, start, head) {
            Ok(id) => Ok(id),
            Err(e) if e.kind() == ErrorKind::IllegalLogId => Ok(start),
            Err(e) => Err(e),
        }
    }

    /// Returns the id of the newest message (the writer head).
    pub fn last_log_id(&self) -> JournalResult<LogId> {
        self.inner.store.current_head()
    }

    /// Returns the next message id after `id` within `[lo, hi]`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalLogId` when there is none.
    pub fn advance_id(&self, id: LogId, lo: LogId, hi: LogId) -> JournalResult<LogId> {
        self.inner.store.advance(id, lo, hi)
    }

    /// Reads a message by id without moving any checkpoint.
    pub fn read_message(&self, id: LogId) -> JournalResult<Message> {
        self.inner.store.read_at(id)
    }

    /// Returns message count and closed flag of one segment.
    pub fn segment_state(&self, epoch: u32) -> JournalResult<IndexState> {
        self.inner.store.segment_state(epoch)
    }

    /// Counts subscribers that may still need to read `epoch`.
    pub fn pending_readers(&self, epoch: u32) -> JournalResult<usize> {
        reclaim::pending_readers(&self.inner.checkpoints, epoch)
    }

    /// Deletes segments every subscriber has moved past.
    ///
    /// With no subscribers registered, every closed segment goes.
    pub fn reclaim(&self) -> JournalResult<Vec<u32>> {
        reclaim::reclaim(&self.inner.store, &self.inner.checkpoints)
    }

    /// Reclamation run after rollover and checkpoint moves. Failures are
    /// logged: the triggering operation already succeeded.
    pub(crate) fn reclaim_consumed(&self) {
        if let Err(e) = reclaim::reclaim_consumed(&self.inner.store, &self.inner.checkpoints) {
            warn!(error = %e, "segment reclamation failed");
        }
    }

    /// Total bytes held by segment data files.
    pub fn raw_size(&self) -> JournalResult<u64> {
        self.inner.dir.raw_size()
    }

    /// Returns the on-disk layout of the journal.
    #[must_use]
    pub fn dir(&self) -> &JournalDir {
        &self.inner.dir
    }

    pub(crate) fn store(&self) -> &Arc<SegmentStore> {
        &self.inner.store
    }

    pub(crate) fn checkpoints(&self) -> &CheckpointStore {
        &self.inner.checkpoints
    }

    pub(crate) fn max_batch(&self) -> u32 {
        self.inner.settings.max_batch.max(1)
    }

    fn append_policy(&self) -> AppendPolicy {
        AppendPolicy {
            safety: self.inner.settings.safety,
            segment_size: self.inner.settings.segment_size,
            sync_interval: self.inner.sync_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Safety;
    use tempfile::tempdir;

    fn small() -> JournalConfig {
        // Three one-byte messages per segment.
        JournalConfig::new().segment_size(16 + 3 * 21)
    }

    #[test]
    fn init_then_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("j");

        assert_eq!(
            Journal::init(&path, &JournalConfig::default().safety(Safety::Safe)).unwrap(),
            InitOutcome::Created
        );
        let journal = Journal::open(&path).unwrap();
        assert_eq!(journal.settings().safety, Safety::Safe);
        assert_eq!(journal.last_log_id().unwrap(), LogId::new(0, 0));
        assert_eq!(journal.first_log_id().unwrap(), LogId::new(0, 0));
    }

    #[test]
    fn init_twice_follows_policy() {
        let temp = tempdir().unwrap();
        Journal::init(temp.path(), &JournalConfig::default()).unwrap();

        let err = Journal::init(temp.path(), &JournalConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CreateExists);

        let outcome =
            Journal::init(temp.path(), &JournalConfig::default().fail_if_exists(false)).unwrap();
        assert_eq!(outcome, InitOutcome::AlreadyExists);
    }

    #[test]
    fn open_uninitialized_fails() {
        let temp = tempdir().unwrap();
        assert_eq!(
            Journal::open(temp.path()).unwrap_err().kind(),
            ErrorKind::MetaOpen
        );
        assert_eq!(
            Journal::open(temp.path().join("missing")).unwrap_err().kind(),
            ErrorKind::Open
        );
    }

    #[test]
    fn rejects_tiny_segments() {
        let temp = tempdir().unwrap();
        let err = Journal::init(temp.path(), &JournalConfig::new().segment_size(8)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalInit);
    }

    #[test]
    fn begin_and_end_registration() {
        let temp = tempdir().unwrap();
        let journal = Journal::open_or_create(temp.path(), &small()).unwrap();
        let writer = journal.open_writer().unwrap();
        for _ in 0..5 {
            writer.write(b"m").unwrap();
        }

        assert_eq!(
            journal.add_subscriber("a", Position::Begin).unwrap(),
            LogId::new(0, 0)
        );
        assert_eq!(
            journal.add_subscriber("b", Position::End).unwrap(),
            LogId::new(1, 2)
        );
        assert_eq!(journal.list_subscribers().unwrap(), vec!["a", "b"]);
        assert_eq!(journal.first_log_id().unwrap(), LogId::new(0, 1));
        assert_eq!(journal.last_log_id().unwrap(), LogId::new(1, 2));
    }

    #[test]
    fn advance_id_walks_everything_once() {
        let temp = tempdir().unwrap();
        let journal = Journal::open_or_create(temp.path(), &small()).unwrap();
        journal.add_subscriber("pin", Position::Begin).unwrap();
        let writer = journal.open_writer().unwrap();
        for _ in 0..7 {
            writer.write(b"m").unwrap();
        }

        let lo = journal.first_log_id().unwrap();
        let hi = journal.last_log_id().unwrap();
        let mut seen = vec![lo];
        let mut id = lo;
        while let Ok(next) = journal.advance_id(id, lo, hi) {
            assert!(next > id);
            seen.push(next);
            id = next;
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(*seen.last().unwrap(), hi);
    }

    #[test]
    fn raw_size_tracks_data() {
        let temp = tempdir().unwrap();
        let journal = Journal::open_or_create(temp.path(), &JournalConfig::default()).unwrap();
        let before = journal.raw_size().unwrap();
        journal.open_writer().unwrap().write(&[0u8; 100]).unwrap();
        assert_eq!(journal.raw_size().unwrap(), before + 120);
    }
}
