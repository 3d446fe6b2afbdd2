//! Read-side access to segments, plus creation, deletion and index rebuild.

use crate::dir::{create_file, JournalDir};
use crate::error::{FileFault, JournalError, JournalResult};
use crate::segment::index::{IndexEntry, IndexState, SegmentIndex};
use crate::segment::record::{RecordHeader, SegmentHeader};
use crate::segment::scan::RecordScanner;
use crate::types::{LogId, Message};
use fanlog_storage::{FileBackend, StorageBackend, StorageError};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of rebuilding an index from its data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    /// Records found and indexed.
    pub records: u32,
    /// Bytes cut from the end of the data file.
    pub truncated: u64,
}

/// One segment opened for reading.
#[derive(Debug)]
struct OpenSegment {
    epoch: u32,
    data: FileBackend,
    index: SegmentIndex,
}

impl OpenSegment {
    fn open(dir: &JournalDir, epoch: u32) -> JournalResult<Self> {
        let data = FileBackend::open_read_only(&dir.segment_path(epoch))
            .map_err(|e| JournalError::segment(FileFault::Open, epoch, e))?;
        let index = FileBackend::open_read_only(&dir.index_path(epoch))
            .map_err(|e| JournalError::index(FileFault::Open, epoch, e))?;
        Ok(Self {
            epoch,
            data,
            index: SegmentIndex::new(epoch, index),
        })
    }

    fn replaced(&self) -> JournalResult<bool> {
        let data = self
            .data
            .is_replaced()
            .map_err(|e| JournalError::segment(FileFault::Open, self.epoch, e))?;
        Ok(data || self.index.replaced()?)
    }

    fn state(&mut self) -> JournalResult<IndexState> {
        let state = self.index.refresh()?;
        if state.closed {
            let len = self
                .data
                .refresh()
                .map_err(|e| JournalError::segment(FileFault::Seek, self.epoch, e))?;
            if len != state.data_end {
                return Err(JournalError::index_corrupt(
                    self.epoch,
                    format!(
                        "closed index covers {} bytes, data file has {len}",
                        state.data_end
                    ),
                ));
            }
        }
        Ok(state)
    }

    fn read(&mut self, sequence: u32) -> JournalResult<Message> {
        let id = LogId::new(self.epoch, sequence);
        self.index.refresh()?;
        let entry = self.index.entry(sequence)?;
        let len = RecordHeader::SIZE + entry.length as usize;

        let bytes = match self.data.read_at(entry.offset, len) {
            Ok(bytes) => bytes,
            Err(StorageError::ReadPastEnd { .. }) => {
                self.data
                    .refresh()
                    .map_err(|e| JournalError::segment(FileFault::Seek, self.epoch, e))?;
                self.data.read_at(entry.offset, len).map_err(|e| match e {
                    StorageError::ReadPastEnd { .. } => JournalError::segment_corrupt(
                        self.epoch,
                        format!("record {id} extends past the end of the data file"),
                    ),
                    other => JournalError::segment(FileFault::Read, self.epoch, other),
                })?
            }
            Err(e) => return Err(JournalError::segment(FileFault::Read, self.epoch, e)),
        };

        let header = RecordHeader::decode(self.epoch, entry.offset, &bytes)?;
        if header.length != entry.length {
            return Err(JournalError::index_corrupt(
                self.epoch,
                format!(
                    "index gives {} bytes for {id}, record header {}",
                    entry.length, header.length
                ),
            ));
        }
        let payload = bytes[RecordHeader::SIZE..].to_vec();
        header.verify(self.epoch, entry.offset, &payload)?;

        Ok(Message {
            id,
            timestamp: header.timestamp,
            payload,
        })
    }
}

/// Access to the segments of one journal.
///
/// Reads never take a lock file: closed segments are immutable, and the
/// open segment only exposes messages whose index entry has been written.
/// One segment at a time stays open between calls.
#[derive(Debug)]
pub struct SegmentStore {
    dir: Arc<JournalDir>,
    cache: Mutex<Option<OpenSegment>>,
}

impl SegmentStore {
    /// Creates a store over `dir`.
    #[must_use]
    pub fn new(dir: Arc<JournalDir>) -> Self {
        Self {
            dir,
            cache: Mutex::new(None),
        }
    }

    /// Returns the journal directory.
    #[must_use]
    pub fn dir(&self) -> &Arc<JournalDir> {
        &self.dir
    }

    /// Lists existing segment epochs, ascending.
    pub fn epochs(&self) -> JournalResult<Vec<u32>> {
        self.dir.segment_epochs()
    }

    /// Returns the oldest retained epoch.
    pub fn oldest_epoch(&self) -> JournalResult<u32> {
        match self.epochs()?.first() {
            Some(&epoch) => Ok(epoch),
            None => Ok(self.dir.load_meta()?.current_epoch),
        }
    }

    /// Returns the newest epoch, which holds the writer head.
    pub fn newest_epoch(&self) -> JournalResult<u32> {
        match self.epochs()?.last() {
            Some(&epoch) => Ok(epoch),
            None => Ok(self.dir.load_meta()?.current_epoch),
        }
    }

    /// Returns the index state of `epoch`: message count and whether the
    /// segment is closed.
    ///
    /// # Errors
    ///
    /// Returns `IndexCorrupt` if a closed index does not cover its data
    /// file exactly.
    pub fn segment_state(&self, epoch: u32) -> JournalResult<IndexState> {
        self.with_segment(epoch, OpenSegment::state)
    }

    /// Returns the id of the last committed message, or `{epoch, 0}` when
    /// the newest segment is still empty.
    pub fn current_head(&self) -> JournalResult<LogId> {
        let epoch = self.newest_epoch()?;
        let state = self.segment_state(epoch)?;
        Ok(LogId::new(epoch, state.count))
    }

    /// Reads one message.
    ///
    /// # Errors
    ///
    /// - `IllegalLogId` if the id names no committed message
    /// - `SegmentCorrupt`/`IndexCorrupt` on damaged files
    pub fn read_at(&self, id: LogId) -> JournalResult<Message> {
        self.with_segment(id.epoch, |segment| segment.read(id.sequence))
    }

    /// Reads every message in `[start, end)`.
    pub fn read_range(&self, start: LogId, end: LogId) -> JournalResult<Vec<Message>> {
        let head = self.current_head()?;
        let mut messages = Vec::new();
        let mut cursor = LogId::new(start.epoch, start.sequence.saturating_sub(1));

        loop {
            match self.advance(cursor, start, head) {
                Ok(id) if id < end => {
                    messages.push(self.read_at(id)?);
                    cursor = id;
                }
                Ok(_) => break,
                Err(e) if e.kind() == crate::error::ErrorKind::IllegalLogId => break,
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    /// Returns the next message id strictly after `id` and within
    /// `[lo, hi]`, crossing into later epochs when `id`'s segment is
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Returns `IllegalLogId` when no such message exists.
    pub fn advance(&self, id: LogId, lo: LogId, hi: LogId) -> JournalResult<LogId> {
        let out_of_range = || JournalError::illegal_log_id(id, format!("no message after it up to {hi}"));
        let epochs = self.epochs()?;

        let successor = match id.sequence.checked_add(1) {
            Some(sequence) => LogId::new(id.epoch, sequence),
            None => LogId::new(id.epoch.checked_add(1).ok_or_else(out_of_range)?, 1),
        };
        let mut next = successor.max(lo);
        if next.sequence == 0 {
            next.sequence = 1;
        }

        loop {
            if next > hi {
                return Err(out_of_range());
            }
            if epochs.binary_search(&next.epoch).is_ok() {
                let state = self.segment_state(next.epoch)?;
                if next.sequence <= state.count {
                    return Ok(next);
                }
            }
            let later = epochs
                .iter()
                .copied()
                .find(|&epoch| epoch > next.epoch)
                .ok_or_else(out_of_range)?;
            next = LogId::new(later, 1);
        }
    }

    /// Creates the segment for `epoch` with an empty index.
    ///
    /// The data file is staged as `<epoch>.tmp` and renamed into place once
    /// its header is durable, so a visible data file always has a header and
    /// an index.
    pub fn create_segment(&self, epoch: u32) -> JournalResult<()> {
        let mode = self.dir.file_mode();

        create_file(&self.dir.index_path(epoch), mode, true)
            .map_err(|e| JournalError::index(FileFault::Open, epoch, e))?;

        let temp = self.dir.segment_temp_path(epoch);
        let mut file = create_file(&temp, mode, true)
            .map_err(|e| JournalError::segment(FileFault::Open, epoch, e))?;
        let write = |file: &mut std::fs::File| -> io::Result<()> {
            file.write_all(&SegmentHeader { epoch }.encode())?;
            file.sync_all()
        };
        write(&mut file).map_err(|e| JournalError::segment(FileFault::Write, epoch, e))?;
        drop(file);

        std::fs::rename(&temp, self.dir.segment_path(epoch))
            .and_then(|()| self.dir.sync_directory())
            .map_err(|e| JournalError::segment(FileFault::Write, epoch, e))?;

        debug!(epoch, "created segment");
        Ok(())
    }

    /// Deletes the data and index files of a closed segment.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` for the newest segment, which the writer may
    /// still be appending to.
    pub fn delete_segment(&self, epoch: u32) -> JournalResult<()> {
        if epoch >= self.newest_epoch()? {
            return Err(JournalError::not_supported(format!(
                "deleting segment {epoch:08x} that is still being written"
            )));
        }

        {
            let mut cache = self.cache.lock();
            if cache.as_ref().is_some_and(|segment| segment.epoch == epoch) {
                *cache = None;
            }
        }

        remove_if_present(&self.dir.segment_path(epoch))
            .map_err(|e| JournalError::segment(FileFault::Write, epoch, e))?;
        remove_if_present(&self.dir.index_path(epoch))
            .map_err(|e| JournalError::index(FileFault::Write, epoch, e))?;
        self.dir
            .sync_directory()
            .map_err(|e| JournalError::segment(FileFault::Write, epoch, e))?;

        info!(epoch, "deleted segment");
        Ok(())
    }

    /// Rebuilds the index of `epoch` by scanning its data file.
    ///
    /// Bytes after the last valid record are truncated. When `close` is set
    /// the new index ends with the closing sentinel. Callers must hold the
    /// writer lock.
    pub fn rebuild_index(&self, epoch: u32, close: bool) -> JournalResult<RebuildReport> {
        let mut data = FileBackend::open_existing(&self.dir.segment_path(epoch))
            .map_err(|e| JournalError::segment(FileFault::Open, epoch, e))?;

        let mut entries = Vec::new();
        let (valid_end, file_size) = {
            let mut scanner = RecordScanner::new(epoch, &data)?;
            for record in scanner.by_ref() {
                let record = record?;
                let sequence = u32::try_from(entries.len() / IndexEntry::SIZE + 1)
                    .map_err(|_| JournalError::index_corrupt(epoch, "too many records"))?;
                let entry = IndexEntry {
                    sequence,
                    offset: record.offset,
                    length: record.header.length,
                };
                entries.extend_from_slice(&entry.encode());
            }
            (scanner.valid_end(), scanner.file_size())
        };

        let truncated = file_size - valid_end;
        if truncated > 0 {
            warn!(epoch, truncated, "truncating invalid tail of segment");
            data.truncate(valid_end)
                .map_err(|e| JournalError::segment(FileFault::Seek, epoch, e))?;
        }
        let records = u32::try_from(entries.len() / IndexEntry::SIZE)
            .map_err(|_| JournalError::index_corrupt(epoch, "too many records"))?;
        if close {
            entries.extend_from_slice(&IndexEntry::sentinel(valid_end).encode());
        }

        let index_path = self.dir.index_path(epoch);
        let mut temp = index_path.clone().into_os_string();
        temp.push(".tmp");
        self.dir
            .write_atomic(std::path::Path::new(&temp), &index_path, &entries)
            .map_err(|e| JournalError::index(FileFault::Write, epoch, e))?;

        {
            let mut cache = self.cache.lock();
            if cache.as_ref().is_some_and(|segment| segment.epoch == epoch) {
                *cache = None;
            }
        }

        info!(epoch, records, closed = close, "rebuilt segment index");
        Ok(RebuildReport { records, truncated })
    }

    fn with_segment<T>(
        &self,
        epoch: u32,
        f: impl FnOnce(&mut OpenSegment) -> JournalResult<T>,
    ) -> JournalResult<T> {
        let mut cache = self.cache.lock();
        // Another process may have rebuilt the index since it was cached.
        let segment = match cache.take() {
            Some(segment) if segment.epoch == epoch && !segment.replaced()? => segment,
            _ => OpenSegment::open(&self.dir, epoch)?,
        };
        let segment = cache.insert(segment);
        f(segment)
    }
}

fn remove_if_present(path: &std::path::Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::segment::record::encode_record;
    use crate::types::Timestamp;
    use tempfile::{tempdir, TempDir};

    fn store() -> (TempDir, SegmentStore) {
        let temp = tempdir().unwrap();
        let (dir, _) = JournalDir::create(temp.path(), 0o640, 0o750).unwrap();
        (temp, SegmentStore::new(Arc::new(dir)))
    }

    /// Appends committed records the way the writer does: data, then index.
    fn write(store: &SegmentStore, epoch: u32, payloads: &[&[u8]]) {
        let dir = store.dir();
        let mut data = FileBackend::open_existing(&dir.segment_path(epoch)).unwrap();
        let mut index =
            SegmentIndex::new(epoch, FileBackend::open_existing(&dir.index_path(epoch)).unwrap());
        let mut sequence = index.state().unwrap().count;
        for payload in payloads {
            sequence += 1;
            let offset = data
                .append(&encode_record(payload, Timestamp::default()))
                .unwrap();
            index
                .append(&IndexEntry {
                    sequence,
                    offset,
                    length: payload.len() as u32,
                })
                .unwrap();
        }
    }

    fn close(store: &SegmentStore, epoch: u32) {
        let dir = store.dir();
        let len = std::fs::metadata(dir.segment_path(epoch)).unwrap().len();
        let mut index =
            SegmentIndex::new(epoch, FileBackend::open_existing(&dir.index_path(epoch)).unwrap());
        index.append(&IndexEntry::sentinel(len)).unwrap();
    }

    #[test]
    fn created_segment_is_empty() {
        let (_temp, store) = store();
        store.create_segment(0).unwrap();

        assert_eq!(store.epochs().unwrap(), vec![0]);
        assert_eq!(store.current_head().unwrap(), LogId::new(0, 0));
        assert!(!store.dir().segment_temp_path(0).exists());
    }

    #[test]
    fn reads_committed_messages() {
        let (_temp, store) = store();
        store.create_segment(0).unwrap();
        write(&store, 0, &[b"one", b"two"]);

        assert_eq!(store.current_head().unwrap(), LogId::new(0, 2));
        assert_eq!(store.read_at(LogId::new(0, 2)).unwrap().payload, b"two");
        assert_eq!(
            store.read_at(LogId::new(0, 3)).unwrap_err().kind(),
            ErrorKind::IllegalLogId
        );
    }

    #[test]
    fn advance_crosses_epochs() {
        let (_temp, store) = store();
        store.create_segment(0).unwrap();
        write(&store, 0, &[b"a", b"b"]);
        close(&store, 0);
        store.create_segment(1).unwrap();
        write(&store, 1, &[b"c"]);

        let lo = LogId::new(0, 1);
        let hi = store.current_head().unwrap();
        assert_eq!(store.advance(lo, lo, hi).unwrap(), LogId::new(0, 2));
        assert_eq!(store.advance(LogId::new(0, 2), lo, hi).unwrap(), LogId::new(1, 1));
        assert_eq!(
            store.advance(hi, lo, hi).unwrap_err().kind(),
            ErrorKind::IllegalLogId
        );
        // Starting before `lo` lands on `lo`.
        assert_eq!(store.advance(LogId::new(0, 0), lo, hi).unwrap(), lo);
    }

    #[test]
    fn read_range_is_half_open() {
        let (_temp, store) = store();
        store.create_segment(0).unwrap();
        write(&store, 0, &[b"a", b"b"]);
        close(&store, 0);
        store.create_segment(1).unwrap();
        write(&store, 1, &[b"c", b"d"]);

        let messages = store
            .read_range(LogId::new(0, 2), LogId::new(1, 2))
            .unwrap();
        let payloads: Vec<&[u8]> = messages.iter().map(|m| m.payload.as_slice()).collect();
        assert_eq!(payloads, vec![&b"b"[..], &b"c"[..]]);
    }

    #[test]
    fn closed_index_must_cover_data() {
        let (_temp, store) = store();
        store.create_segment(0).unwrap();
        write(&store, 0, &[b"a"]);
        close(&store, 0);

        let mut data = FileBackend::open_existing(&store.dir().segment_path(0)).unwrap();
        data.append(b"junk").unwrap();

        assert_eq!(
            store.segment_state(0).unwrap_err().kind(),
            ErrorKind::IndexCorrupt
        );
    }

    #[test]
    fn corrupted_payload_reported() {
        let (_temp, store) = store();
        store.create_segment(0).unwrap();
        write(&store, 0, &[b"payload"]);

        let path = store.dir().segment_path(0);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        assert_eq!(
            store.read_at(LogId::new(0, 1)).unwrap_err().kind(),
            ErrorKind::SegmentCorrupt
        );
    }

    #[test]
    fn delete_refuses_newest_segment() {
        let (_temp, store) = store();
        store.create_segment(0).unwrap();
        close(&store, 0);
        store.create_segment(1).unwrap();

        assert_eq!(
            store.delete_segment(1).unwrap_err().kind(),
            ErrorKind::NotSupported
        );
        store.delete_segment(0).unwrap();
        assert_eq!(store.epochs().unwrap(), vec![1]);
        assert!(!store.dir().index_path(0).exists());
    }

    #[test]
    fn rebuild_recovers_index_and_trims_tail() {
        let (_temp, store) = store();
        store.create_segment(0).unwrap();
        write(&store, 0, &[b"a", b"bb"]);

        let dir = store.dir();
        std::fs::remove_file(dir.index_path(0)).unwrap();
        let mut data = FileBackend::open_existing(&dir.segment_path(0)).unwrap();
        data.append(&[0x01, 0x02, 0x03]).unwrap();

        let report = store.rebuild_index(0, false).unwrap();
        assert_eq!(report, RebuildReport { records: 2, truncated: 3 });
        assert_eq!(store.read_at(LogId::new(0, 2)).unwrap().payload, b"bb");
        assert!(!store.segment_state(0).unwrap().closed);
    }

    #[test]
    fn overflowing_index_entry_is_reported() {
        let (_temp, store) = store();
        store.create_segment(0).unwrap();
        let mut index = SegmentIndex::new(
            0,
            FileBackend::open_existing(&store.dir().index_path(0)).unwrap(),
        );
        index
            .append(&IndexEntry {
                sequence: 1,
                offset: u64::MAX - 4,
                length: 10,
            })
            .unwrap();

        assert_eq!(
            store.segment_state(0).unwrap_err().kind(),
            ErrorKind::IndexCorrupt
        );
        assert_eq!(
            store.read_at(LogId::new(0, 1)).unwrap_err().kind(),
            ErrorKind::IndexCorrupt
        );
    }

    #[test]
    fn cached_segment_follows_rebuilt_index() {
        let (_temp, store) = store();
        store.create_segment(0).unwrap();
        write(&store, 0, &[b"a"]);
        assert_eq!(store.read_at(LogId::new(0, 1)).unwrap().payload, b"a");

        // Another process rebuilds the index, then the writer continues.
        let other = SegmentStore::new(Arc::clone(store.dir()));
        other.rebuild_index(0, false).unwrap();
        write(&store, 0, &[b"b"]);

        assert_eq!(store.current_head().unwrap(), LogId::new(0, 2));
        assert_eq!(store.read_at(LogId::new(0, 2)).unwrap().payload, b"b");
    }
}
