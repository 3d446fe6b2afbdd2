//! Segment listing.

use fanlog_core::inspect::segment_files;
use fanlog_core::{Journal, JournalResult};
use serde::Serialize;

/// One segment on disk.
#[derive(Debug, Serialize)]
pub struct SegmentEntry {
    /// Data file name.
    pub file: String,
    /// Data file size in bytes.
    pub size: u64,
    /// Subscribers that still need this segment.
    pub pending_readers: usize,
    /// Index information, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexInfo>,
}

/// What the index file says about a segment.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexInfo {
    /// No index file.
    Missing,
    /// The index could not be read.
    Unreadable {
        /// Why.
        error: String,
    },
    /// The index was read.
    Present {
        /// Index file size in bytes.
        size: u64,
        /// Committed messages.
        messages: u32,
        /// Whether the segment has been rolled over.
        closed: bool,
    },
}

/// Lists every segment, oldest first.
pub fn list(journal: &Journal, with_index: bool) -> JournalResult<Vec<SegmentEntry>> {
    let mut entries = Vec::new();
    for file in segment_files(journal)? {
        let index = with_index.then(|| match file.index_size {
            None => IndexInfo::Missing,
            Some(size) => match journal.segment_state(file.epoch) {
                Ok(state) => IndexInfo::Present {
                    size,
                    messages: state.count,
                    closed: state.closed,
                },
                Err(e) => IndexInfo::Unreadable {
                    error: e.to_string(),
                },
            },
        });
        entries.push(SegmentEntry {
            file: format!("{:08x}", file.epoch),
            size: file.data_size,
            pending_readers: journal.pending_readers(file.epoch)?,
            index,
        });
    }
    Ok(entries)
}

pub(super) fn print_list(entries: &[SegmentEntry], verbose: bool) {
    if entries.is_empty() {
        println!("  no segments");
    }
    for entry in entries {
        println!(
            "  {} [{} bytes] {} pending readers",
            entry.file, entry.size, entry.pending_readers
        );
        match &entry.index {
            None => {}
            Some(IndexInfo::Missing) => println!("    idx: none"),
            Some(IndexInfo::Unreadable { error }) => println!("    idx: unreadable ({error})"),
            Some(IndexInfo::Present {
                size,
                messages,
                closed,
            }) => {
                let state = if *closed { "closed" } else { "open" };
                if verbose {
                    println!("    idx: {messages} messages ({messages:08x}), {state}, {size} bytes");
                } else {
                    println!("    idx: {messages} messages ({messages:08x}), {state}");
                }
            }
        }
    }
}
