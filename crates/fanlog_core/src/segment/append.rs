//! Write side of the segment store.

use crate::dir::{DirLock, JournalDir};
use crate::error::{FileFault, JournalError, JournalResult};
use crate::segment::index::{IndexEntry, IndexState, SegmentIndex};
use crate::segment::record::{encode_record, SegmentHeader};
use crate::segment::store::SegmentStore;
use crate::types::{LogId, Safety, Timestamp};
use fanlog_storage::{FileBackend, StorageBackend};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Limits and durability applied by an [`Appender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendPolicy {
    /// Durability level.
    pub safety: Safety,
    /// Segment capacity in bytes.
    pub segment_size: u64,
    /// Appends between periodic syncs at `AlmostSafe`.
    pub sync_interval: u32,
}

/// Outcome of one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// Id assigned to the message.
    pub id: LogId,
    /// Whether the append closed the previous segment.
    pub rolled_over: bool,
}

/// The segment currently being appended to.
#[derive(Debug)]
struct ActiveSegment {
    epoch: u32,
    data: FileBackend,
    index: SegmentIndex,
    state: IndexState,
}

impl ActiveSegment {
    fn open(dir: &JournalDir, epoch: u32) -> JournalResult<Self> {
        let data = FileBackend::open_existing(&dir.segment_path(epoch))
            .map_err(|e| JournalError::segment(FileFault::Open, epoch, e))?;
        let header = data
            .read_at(0, SegmentHeader::SIZE)
            .map_err(|_| JournalError::segment_corrupt(epoch, "segment header truncated"))?;
        SegmentHeader::decode(epoch, &header)?;

        let index = FileBackend::open_existing(&dir.index_path(epoch))
            .map_err(|e| JournalError::index(FileFault::Open, epoch, e))?;
        let index = SegmentIndex::new(epoch, index);
        let state = index.state()?;
        Ok(Self {
            epoch,
            data,
            index,
            state,
        })
    }

    /// Re-derives the committed state from disk and drops anything past it.
    ///
    /// The index entry is the commit point of a write: a torn index entry
    /// and data bytes beyond the last indexed record are discarded.
    fn resync(&mut self) -> JournalResult<IndexState> {
        self.index.refresh()?;
        let torn = self.index.trim_partial()?;
        if torn > 0 {
            warn!(epoch = self.epoch, bytes = torn, "dropped torn index entry");
        }
        let state = self.index.state()?;

        let len = self
            .data
            .refresh()
            .map_err(|e| JournalError::segment(FileFault::Seek, self.epoch, e))?;
        if len < state.data_end {
            return Err(JournalError::segment_corrupt(
                self.epoch,
                format!("index covers {} bytes, data file has {len}", state.data_end),
            ));
        }
        if len > state.data_end && !state.closed {
            warn!(
                epoch = self.epoch,
                bytes = len - state.data_end,
                "truncating uncommitted segment tail"
            );
            self.data
                .truncate(state.data_end)
                .map_err(|e| JournalError::segment(FileFault::Seek, self.epoch, e))?;
        }

        self.state = state;
        Ok(state)
    }

    /// Whether either file was swapped out under this handle, as
    /// [`SegmentStore::rebuild_index`] does to the index.
    fn replaced(&self) -> JournalResult<bool> {
        let data = self
            .data
            .is_replaced()
            .map_err(|e| JournalError::segment(FileFault::Open, self.epoch, e))?;
        Ok(data || self.index.replaced()?)
    }

    fn sync(&mut self) -> JournalResult<()> {
        self.data
            .sync()
            .map_err(|e| JournalError::segment(FileFault::Write, self.epoch, e))?;
        self.index.sync()
    }
}

/// Appends messages to a journal.
///
/// Every append runs under the journal's `writer.lock`, so appenders in
/// different processes interleave safely. The committed state is re-read
/// from disk under the lock before each append.
#[derive(Debug)]
pub struct Appender {
    lock: DirLock,
    store: Arc<SegmentStore>,
    policy: AppendPolicy,
    active: Option<ActiveSegment>,
    unsynced: u32,
}

impl Appender {
    /// Creates an appender and recovers the current segment.
    ///
    /// Recovery rebuilds a missing index and truncates uncommitted bytes.
    pub fn open(store: Arc<SegmentStore>, policy: AppendPolicy) -> JournalResult<Self> {
        let lock = store.dir().writer_lock()?;
        let mut appender = Self {
            lock,
            store,
            policy,
            active: None,
            unsynced: 0,
        };
        {
            let _guard = appender.lock.acquire()?;
            let active = Self::resync(&appender.store, appender.active.take())?;
            appender.active = Some(active);
        }
        Ok(appender)
    }

    /// Returns the durability policy.
    #[must_use]
    pub fn policy(&self) -> AppendPolicy {
        self.policy
    }

    /// Appends one message.
    ///
    /// # Errors
    ///
    /// - `IllegalWrite` if the payload does not fit a record
    /// - `Segment*`/`Index*` kinds on I/O failure
    pub fn append(&mut self, payload: &[u8], timestamp: Timestamp) -> JournalResult<Appended> {
        let length = u32::try_from(payload.len())
            .map_err(|_| JournalError::illegal_write("payload larger than 4 GiB"))?;
        let record = encode_record(payload, timestamp);

        let _guard = self.lock.acquire()?;
        let mut active = Self::resync(&self.store, self.active.take())?;

        let mut rolled_over = false;
        let full = active.state.data_end + record.len() as u64 > self.policy.segment_size;
        if full && active.state.count > 0 {
            active = Self::roll_over(&self.store, self.policy, active)?;
            self.unsynced = 0;
            rolled_over = true;
        }

        let epoch = active.epoch;
        let offset = active
            .data
            .append(&record)
            .map_err(|e| JournalError::segment(FileFault::Write, epoch, e))?;
        if self.policy.safety == Safety::Safe {
            active
                .data
                .sync()
                .map_err(|e| JournalError::segment(FileFault::Write, epoch, e))?;
        }

        let sequence = active.state.count + 1;
        let entry = IndexEntry {
            sequence,
            offset,
            length,
        };
        active.index.append(&entry)?;
        if self.policy.safety == Safety::Safe {
            active.index.sync()?;
        }
        active.state = IndexState {
            count: sequence,
            closed: false,
            data_end: entry
                .record_end()
                .ok_or_else(|| JournalError::illegal_write("record ends past the offset space"))?,
        };

        if self.policy.safety == Safety::AlmostSafe {
            self.unsynced += 1;
            if self.unsynced >= self.policy.sync_interval.max(1) {
                active.sync()?;
                self.unsynced = 0;
            }
        }

        self.active = Some(active);
        let id = LogId::new(epoch, sequence);
        debug!(%id, bytes = length, "appended message");
        Ok(Appended { id, rolled_over })
    }

    /// Forces appended data and index entries to disk.
    pub fn sync(&mut self) -> JournalResult<()> {
        if let Some(active) = self.active.as_mut() {
            active.sync()?;
        }
        self.unsynced = 0;
        Ok(())
    }

    /// Syncs pending appends unless the policy is `Unsafe`.
    pub fn close(mut self) -> JournalResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> JournalResult<()> {
        if self.policy.safety != Safety::Unsafe && self.unsynced > 0 {
            self.sync()?;
        }
        Ok(())
    }

    /// Opens (or keeps) the segment holding the writer head and resyncs it,
    /// moving past segments another writer has closed. A cached segment
    /// whose files were replaced on disk is reopened.
    fn resync(store: &SegmentStore, cached: Option<ActiveSegment>) -> JournalResult<ActiveSegment> {
        let dir = store.dir();
        let mut active = match cached {
            Some(active) if !active.replaced()? => active,
            Some(stale) => {
                debug!(epoch = stale.epoch, "segment files replaced, reopening");
                Self::open_segment(store, stale.epoch)?
            }
            None => {
                let meta_epoch = dir.load_meta()?.current_epoch;
                let epoch = store
                    .epochs()?
                    .last()
                    .copied()
                    .map_or(meta_epoch, |listed| listed.max(meta_epoch));
                Self::open_segment(store, epoch)?
            }
        };

        while active.resync()?.closed {
            let next = active
                .epoch
                .checked_add(1)
                .ok_or_else(|| JournalError::illegal_write("epoch space exhausted"))?;
            active = Self::open_segment(store, next)?;
        }
        Ok(active)
    }

    fn open_segment(store: &SegmentStore, epoch: u32) -> JournalResult<ActiveSegment> {
        let dir = store.dir();
        if !dir.segment_path(epoch).exists() {
            store.create_segment(epoch)?;
            Self::record_epoch(dir, epoch)?;
        } else if !dir.index_path(epoch).exists() {
            warn!(epoch, "index missing, rebuilding");
            store.rebuild_index(epoch, false)?;
        }
        ActiveSegment::open(dir, epoch)
    }

    fn roll_over(
        store: &SegmentStore,
        policy: AppendPolicy,
        mut active: ActiveSegment,
    ) -> JournalResult<ActiveSegment> {
        let closed = active.epoch;
        active
            .index
            .append(&IndexEntry::sentinel(active.state.data_end))?;
        if policy.safety != Safety::Unsafe {
            active.sync()?;
        }

        let next = closed
            .checked_add(1)
            .ok_or_else(|| JournalError::illegal_write("epoch space exhausted"))?;
        store.create_segment(next)?;
        Self::record_epoch(store.dir(), next)?;

        info!(closed, epoch = next, "rolled over to new segment");
        ActiveSegment::open(store.dir(), next)
    }

    fn record_epoch(dir: &JournalDir, epoch: u32) -> JournalResult<()> {
        let mut meta = dir.load_meta()?;
        if meta.current_epoch < epoch {
            meta.current_epoch = epoch;
            dir.save_meta(&meta)?;
        }
        Ok(())
    }
}

impl Drop for Appender {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(error = %e, "failed to sync journal on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::meta::Metastore;
    use tempfile::{tempdir, TempDir};

    fn setup(segment_size: u64) -> (TempDir, Arc<SegmentStore>, AppendPolicy) {
        let temp = tempdir().unwrap();
        let (dir, _) = JournalDir::create(temp.path(), 0o640, 0o750).unwrap();
        dir.save_meta(&Metastore::from_config(&JournalConfig::default()))
            .unwrap();
        let store = Arc::new(SegmentStore::new(Arc::new(dir)));
        store.create_segment(0).unwrap();
        let policy = AppendPolicy {
            safety: Safety::AlmostSafe,
            segment_size,
            sync_interval: 2,
        };
        (temp, store, policy)
    }

    /// Segment size that holds exactly three one-byte messages.
    const THREE_SMALL: u64 = SegmentHeader::SIZE as u64 + 3 * 21;

    #[test]
    fn sequences_start_at_one() {
        let (_temp, store, policy) = setup(1 << 20);
        let mut appender = Appender::open(store.clone(), policy).unwrap();

        let first = appender.append(b"a", Timestamp::now()).unwrap();
        let second = appender.append(b"b", Timestamp::now()).unwrap();
        assert_eq!(first.id, LogId::new(0, 1));
        assert_eq!(second.id, LogId::new(0, 2));
        assert_eq!(store.current_head().unwrap(), LogId::new(0, 2));
    }

    #[test]
    fn rollover_at_capacity() {
        let (_temp, store, policy) = setup(THREE_SMALL);
        let mut appender = Appender::open(store.clone(), policy).unwrap();

        let ids: Vec<Appended> = (0..7)
            .map(|_| appender.append(b"x", Timestamp::now()).unwrap())
            .collect();

        assert_eq!(ids[2].id, LogId::new(0, 3));
        assert_eq!(ids[3].id, LogId::new(1, 1));
        assert!(ids[3].rolled_over);
        assert_eq!(ids[6].id, LogId::new(2, 1));

        let counts: Vec<(u32, bool)> = (0..3)
            .map(|e| {
                let state = store.segment_state(e).unwrap();
                (state.count, state.closed)
            })
            .collect();
        assert_eq!(counts, vec![(3, true), (3, true), (1, false)]);
        assert_eq!(store.dir().load_meta().unwrap().current_epoch, 2);
    }

    #[test]
    fn oversized_message_gets_its_own_segment() {
        let (_temp, store, policy) = setup(64);
        let mut appender = Appender::open(store.clone(), policy).unwrap();

        assert_eq!(appender.append(&[7u8; 200], Timestamp::now()).unwrap().id, LogId::new(0, 1));
        assert_eq!(appender.append(b"y", Timestamp::now()).unwrap().id, LogId::new(1, 1));
        assert_eq!(store.read_at(LogId::new(0, 1)).unwrap().len(), 200);
    }

    #[test]
    fn two_appenders_share_the_head() {
        let (_temp, store, policy) = setup(THREE_SMALL);
        let mut a = Appender::open(store.clone(), policy).unwrap();
        let mut b = Appender::open(store.clone(), policy).unwrap();

        assert_eq!(a.append(b"1", Timestamp::now()).unwrap().id, LogId::new(0, 1));
        assert_eq!(b.append(b"2", Timestamp::now()).unwrap().id, LogId::new(0, 2));
        assert_eq!(a.append(b"3", Timestamp::now()).unwrap().id, LogId::new(0, 3));
        // `b` rolls over; `a` must follow it into epoch 1.
        assert_eq!(b.append(b"4", Timestamp::now()).unwrap().id, LogId::new(1, 1));
        assert_eq!(a.append(b"5", Timestamp::now()).unwrap().id, LogId::new(1, 2));
    }

    #[test]
    fn reopen_truncates_uncommitted_tail() {
        let (_temp, store, policy) = setup(1 << 20);
        {
            let mut appender = Appender::open(store.clone(), policy).unwrap();
            appender.append(b"kept", Timestamp::now()).unwrap();
        }

        let path = store.dir().segment_path(0);
        let committed = std::fs::metadata(&path).unwrap().len();
        let mut data = FileBackend::open_existing(&path).unwrap();
        data.append(&encode_record(b"lost", Timestamp::now())).unwrap();

        let mut appender = Appender::open(store.clone(), policy).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), committed);
        assert_eq!(appender.append(b"next", Timestamp::now()).unwrap().id, LogId::new(0, 2));
        assert_eq!(store.read_at(LogId::new(0, 2)).unwrap().payload, b"next");
    }

    #[test]
    fn missing_index_rebuilt_on_open() {
        let (_temp, store, policy) = setup(1 << 20);
        {
            let mut appender = Appender::open(store.clone(), policy).unwrap();
            appender.append(b"a", Timestamp::now()).unwrap();
            appender.append(b"b", Timestamp::now()).unwrap();
        }
        std::fs::remove_file(store.dir().index_path(0)).unwrap();

        let mut appender = Appender::open(store.clone(), policy).unwrap();
        assert_eq!(appender.append(b"c", Timestamp::now()).unwrap().id, LogId::new(0, 3));
    }
}
