//! Per-subscriber readers.
//!
//! A reader consumes the journal on behalf of one subscriber. It hands out
//! intervals of unread messages starting after the subscriber's durable
//! checkpoint; the checkpoint only moves when the caller says so, so a
//! crash between reading and checkpointing replays the interval.

use crate::dir::DirLock;
use crate::error::{JournalError, JournalResult};
use crate::journal::Journal;
use crate::types::{LogId, Message};
use tracing::debug;

/// Messages of one segment inside an interval, as inclusive sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    epoch: u32,
    first: u32,
    last: u32,
}

/// A batch of unread messages.
///
/// When `count` is zero the subscriber is caught up and `first` and `last`
/// both equal its checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadInterval {
    /// First unread message.
    pub first: LogId,
    /// Last message of the batch.
    pub last: LogId,
    /// Number of messages in the batch.
    pub count: u32,
    spans: Vec<Span>,
}

impl ReadInterval {
    fn caught_up(at: LogId) -> Self {
        Self {
            first: at,
            last: at,
            count: 0,
            spans: Vec::new(),
        }
    }

    /// Returns whether the batch holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterates over the ids of the batch in order.
    pub fn ids(&self) -> impl Iterator<Item = LogId> + '_ {
        self.spans
            .iter()
            .flat_map(|span| (span.first..=span.last).map(move |seq| LogId::new(span.epoch, seq)))
    }
}

/// Reads the journal as one subscriber.
///
/// Only one reader per subscriber can be open at a time, across processes;
/// it holds `cp.<hex>.lock` until dropped.
#[derive(Debug)]
pub struct Reader {
    journal: Journal,
    subscriber: String,
    delivered: Option<LogId>,
    _lock: DirLock,
}

impl Reader {
    pub(crate) fn open(journal: Journal, subscriber: &str) -> JournalResult<Self> {
        let lock = journal.checkpoints().hold_reader(subscriber)?;

        debug!(subscriber, "reader opened");
        Ok(Self {
            journal,
            subscriber: subscriber.to_string(),
            delivered: None,
            _lock: lock,
        })
    }

    /// Returns the subscriber name.
    #[must_use]
    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    /// Returns the durable checkpoint.
    pub fn current_checkpoint(&self) -> JournalResult<LogId> {
        self.journal.checkpoints().get(&self.subscriber)
    }

    /// Returns the next batch of unread messages, at most `max_batch` long.
    ///
    /// A checkpoint left at the end of a closed segment is first moved to
    /// the start of the next one.
    ///
    /// # Errors
    ///
    /// Returns `IndexCorrupt` if the checkpoint lies beyond the messages of
    /// its segment.
    pub fn read_interval(&mut self) -> JournalResult<ReadInterval> {
        let start = self.normalized_checkpoint()?;
        let store = self.journal.store();
        let head = store.current_head()?;
        let max = self.journal.max_batch();

        let mut spans = Vec::new();
        let mut count = 0u32;
        for epoch in store.epochs()? {
            if epoch < start.epoch || epoch > head.epoch || count == max {
                continue;
            }
            let state = store.segment_state(epoch)?;
            let from = if epoch == start.epoch {
                if start.sequence > state.count {
                    return Err(JournalError::index_corrupt(
                        epoch,
                        format!(
                            "checkpoint {start} of {} is past the {} indexed messages",
                            self.subscriber, state.count
                        ),
                    ));
                }
                start.sequence + 1
            } else {
                1
            };
            let upto = if epoch == head.epoch {
                head.sequence.min(state.count)
            } else {
                state.count
            };
            if from > upto {
                continue;
            }
            let take = (upto - from + 1).min(max - count);
            spans.push(Span {
                epoch,
                first: from,
                last: from + take - 1,
            });
            count += take;
        }

        let (Some(first), Some(last)) = (spans.first(), spans.last()) else {
            return Ok(ReadInterval::caught_up(start));
        };
        let interval = ReadInterval {
            first: LogId::new(first.epoch, first.first),
            last: LogId::new(last.epoch, last.last),
            count,
            spans,
        };
        debug!(
            subscriber = %self.subscriber,
            first = %interval.first,
            last = %interval.last,
            count,
            "read interval"
        );
        Ok(interval)
    }

    /// Reads one message and records it as delivered.
    ///
    /// # Errors
    ///
    /// - `IllegalLogId` if the id names no committed message
    /// - `SegmentCorrupt`/`IndexCorrupt` on damaged files
    pub fn read_message(&mut self, id: LogId) -> JournalResult<Message> {
        let message = self.journal.store().read_at(id)?;
        self.delivered = Some(self.delivered.map_or(id, |seen| seen.max(id)));
        Ok(message)
    }

    /// Durably moves the checkpoint to `id`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalCheckpoint` if `id` is behind the current checkpoint
    /// or past the last message this reader delivered.
    pub fn checkpoint(&mut self, id: LogId) -> JournalResult<()> {
        let current = self.current_checkpoint()?;
        if id < current {
            return Err(JournalError::illegal_checkpoint(
                id,
                format!("behind the current checkpoint {current}"),
            ));
        }
        if id == current {
            return Ok(());
        }
        let limit = self.delivered.map_or(current, |seen| seen.max(current));
        if id > limit {
            return Err(JournalError::illegal_checkpoint(
                id,
                format!("past the last delivered message {limit}"),
            ));
        }

        self.journal.checkpoints().set(&self.subscriber, id)?;
        if id.epoch > current.epoch {
            self.journal.reclaim_consumed();
        }
        Ok(())
    }

    /// Returns the next message id after `id` within `[lo, hi]`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalLogId` when there is none.
    pub fn advance_id(&self, id: LogId, lo: LogId, hi: LogId) -> JournalResult<LogId> {
        self.journal.advance_id(id, lo, hi)
    }

    /// Releases the subscriber lock.
    pub fn close(self) {
        debug!(subscriber = %self.subscriber, "reader closed");
    }

    /// Moves a checkpoint that ends a closed segment, or that names a
    /// segment no longer on disk, to the start of the next segment.
    fn normalized_checkpoint(&mut self) -> JournalResult<LogId> {
        let stored = self.current_checkpoint()?;
        let store = self.journal.store();
        let epochs = store.epochs()?;

        let mut checkpoint = stored;
        loop {
            let Some(&next) = epochs.iter().find(|&&epoch| epoch > checkpoint.epoch) else {
                break;
            };
            if epochs.binary_search(&checkpoint.epoch).is_ok() {
                let state = store.segment_state(checkpoint.epoch)?;
                if !state.closed || checkpoint.sequence < state.count {
                    break;
                }
            }
            checkpoint = LogId::epoch_start(next);
        }

        if checkpoint != stored {
            self.journal.checkpoints().set(&self.subscriber, checkpoint)?;
            debug!(subscriber = %self.subscriber, from = %stored, to = %checkpoint, "checkpoint normalized");
            self.journal.reclaim_consumed();
        }
        Ok(checkpoint)
    }
}
