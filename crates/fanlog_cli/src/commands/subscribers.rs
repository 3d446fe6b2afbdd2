//! Subscriber administration and perspective.

use fanlog_core::{Journal, JournalResult, LogId, Position};
use serde::Serialize;

/// A subscriber and its checkpoint.
#[derive(Debug, Serialize)]
pub struct SubscriberEntry {
    /// Subscriber name.
    pub name: String,
    /// Durable checkpoint.
    pub checkpoint: String,
}

/// What a subscriber would read next.
#[derive(Debug, Serialize)]
pub struct Perspective {
    /// Subscriber name.
    pub subscriber: String,
    /// Durable checkpoint before this look.
    pub checkpoint: String,
    /// Id of the newest message in the journal.
    pub last_write: String,
    /// First id of the next interval.
    pub first: String,
    /// Last id of the next interval.
    pub last: String,
    /// Messages in the next interval.
    pub count: u32,
}

/// Registers `name` at the oldest retained message.
pub fn add(journal: &Journal, name: &str) -> JournalResult<LogId> {
    journal.add_subscriber(name, Position::Begin)
}

/// Lists every subscriber with its checkpoint.
pub fn list(journal: &Journal) -> JournalResult<Vec<SubscriberEntry>> {
    let mut entries = Vec::new();
    for name in journal.list_subscribers()? {
        let checkpoint = journal.get_checkpoint(&name)?;
        entries.push(SubscriberEntry {
            name,
            checkpoint: checkpoint.to_string(),
        });
    }
    Ok(entries)
}

/// Computes the next interval of `name` without consuming it.
///
/// Opening the reader takes the subscriber's lock, so this fails while a
/// consumer is running.
pub fn perspective(journal: &Journal, name: &str) -> JournalResult<Perspective> {
    let last_write = journal.last_log_id()?;
    let mut reader = journal.open_reader(name)?;
    let checkpoint = reader.current_checkpoint()?;
    let interval = reader.read_interval()?;
    reader.close();

    Ok(Perspective {
        subscriber: name.to_string(),
        checkpoint: checkpoint.to_string(),
        last_write: last_write.to_string(),
        first: interval.first.to_string(),
        last: interval.last.to_string(),
        count: interval.count,
    })
}

pub(super) fn print_perspective(p: &Perspective) {
    println!("  {} @ {}", p.subscriber, p.checkpoint);
    println!("    last write: {}", p.last_write);
    if p.count == 0 {
        println!("    caught up");
    } else {
        println!("    next interval: [{}, {}] ({} messages)", p.first, p.last, p.count);
    }
}

pub(super) fn print_list(entries: &[SubscriberEntry]) {
    if entries.is_empty() {
        println!("  no subscribers");
    }
    for entry in entries {
        println!("  {} @ {}", entry.name, entry.checkpoint);
    }
}
