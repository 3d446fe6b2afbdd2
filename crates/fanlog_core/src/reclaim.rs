//! Segment reclamation.
//!
//! A segment can be deleted once every subscriber has moved past it: its
//! epoch is older than the oldest checkpoint epoch and older than the
//! segment the writer is appending to.

use crate::checkpoint::CheckpointStore;
use crate::error::JournalResult;
use crate::segment::SegmentStore;
use tracing::info;

/// Counts subscribers whose checkpoint epoch is at or before `epoch`, i.e.
/// that may still need to read it.
pub fn pending_readers(checkpoints: &CheckpointStore, epoch: u32) -> JournalResult<usize> {
    Ok(checkpoints
        .all()?
        .iter()
        .filter(|(_, id)| id.epoch <= epoch)
        .count())
}

/// Returns the first epoch that must be kept.
///
/// With no subscribers, only the segment being written is kept.
pub fn retention_floor(store: &SegmentStore, checkpoints: &CheckpointStore) -> JournalResult<u32> {
    let current = store.newest_epoch()?;
    let oldest_checkpoint = checkpoints
        .all()?
        .iter()
        .map(|(_, id)| id.epoch)
        .min()
        .unwrap_or(current);
    Ok(oldest_checkpoint.min(current))
}

/// Deletes every segment no subscriber needs and returns the deleted
/// epochs, ascending.
///
/// Runs under `meta.lock` so that no subscriber registers at `Begin` while
/// segments disappear under it.
pub fn reclaim(store: &SegmentStore, checkpoints: &CheckpointStore) -> JournalResult<Vec<u32>> {
    let _guard = checkpoints.meta_lock().acquire()?;
    delete_below_floor(store, checkpoints)
}

/// Like [`reclaim`], but keeps everything while nobody is subscribed.
///
/// This is the variant run after rollover and checkpoint moves: history
/// written before the first registration stays available to `Begin`.
pub fn reclaim_consumed(
    store: &SegmentStore,
    checkpoints: &CheckpointStore,
) -> JournalResult<Vec<u32>> {
    let _guard = checkpoints.meta_lock().acquire()?;
    if checkpoints.list()?.is_empty() {
        return Ok(Vec::new());
    }
    delete_below_floor(store, checkpoints)
}

fn delete_below_floor(
    store: &SegmentStore,
    checkpoints: &CheckpointStore,
) -> JournalResult<Vec<u32>> {
    let floor = retention_floor(store, checkpoints)?;

    let mut deleted = Vec::new();
    for epoch in store.epochs()? {
        if epoch >= floor {
            break;
        }
        store.delete_segment(epoch)?;
        deleted.push(epoch);
    }
    if !deleted.is_empty() {
        info!(count = deleted.len(), floor, "reclaimed segments");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::JournalDir;
    use crate::segment::{IndexEntry, SegmentIndex};
    use crate::types::LogId;
    use fanlog_storage::FileBackend;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    /// Three empty segments, the first two closed.
    fn setup() -> (TempDir, SegmentStore, CheckpointStore) {
        let temp = tempdir().unwrap();
        let (dir, _) = JournalDir::create(temp.path(), 0o640, 0o750).unwrap();
        let dir = Arc::new(dir);
        let store = SegmentStore::new(dir.clone());
        for epoch in 0..3 {
            store.create_segment(epoch).unwrap();
            if epoch < 2 {
                let backend = FileBackend::open_existing(&dir.index_path(epoch)).unwrap();
                SegmentIndex::new(epoch, backend)
                    .append(&IndexEntry::sentinel(16))
                    .unwrap();
            }
        }
        let checkpoints = CheckpointStore::new(dir).unwrap();
        (temp, store, checkpoints)
    }

    #[test]
    fn pending_counts_lagging_subscribers() {
        let (_temp, _store, checkpoints) = setup();
        checkpoints.register("a", || Ok(LogId::new(0, 0))).unwrap();
        checkpoints.register("b", || Ok(LogId::new(1, 3))).unwrap();

        assert_eq!(pending_readers(&checkpoints, 0).unwrap(), 1);
        assert_eq!(pending_readers(&checkpoints, 1).unwrap(), 2);
        assert_eq!(pending_readers(&checkpoints, 2).unwrap(), 2);
    }

    #[test]
    fn reclaim_keeps_segments_still_pending() {
        let (_temp, store, checkpoints) = setup();
        checkpoints.register("slow", || Ok(LogId::new(1, 0))).unwrap();

        assert_eq!(reclaim(&store, &checkpoints).unwrap(), vec![0]);
        assert_eq!(store.epochs().unwrap(), vec![1, 2]);

        checkpoints.set("slow", LogId::new(2, 0)).unwrap();
        assert_eq!(reclaim(&store, &checkpoints).unwrap(), vec![1]);
        assert_eq!(pending_readers(&checkpoints, 1).unwrap(), 0);
    }

    #[test]
    fn automatic_reclaim_waits_for_a_subscriber() {
        let (_temp, store, checkpoints) = setup();
        assert!(reclaim_consumed(&store, &checkpoints).unwrap().is_empty());
        assert_eq!(store.epochs().unwrap(), vec![0, 1, 2]);

        checkpoints.register("late", || Ok(LogId::new(2, 0))).unwrap();
        assert_eq!(reclaim_consumed(&store, &checkpoints).unwrap(), vec![0, 1]);
    }

    #[test]
    fn no_subscribers_keeps_only_current_segment() {
        let (_temp, store, checkpoints) = setup();
        assert_eq!(reclaim(&store, &checkpoints).unwrap(), vec![0, 1]);
        assert_eq!(store.epochs().unwrap(), vec![2]);
        assert!(reclaim(&store, &checkpoints).unwrap().is_empty());
    }
}
