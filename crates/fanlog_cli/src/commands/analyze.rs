//! Data file analysis and repair.

use fanlog_core::inspect::{inspect_segment, repair_segment, segment_files};
use fanlog_core::{Journal, JournalResult};
use serde::Serialize;
use tracing::info;

/// Analysis of one segment.
#[derive(Debug, Serialize)]
pub struct SegmentAnalysis {
    /// Data file name.
    pub file: String,
    /// Data file size in bytes.
    pub size: u64,
    /// Valid records found by scanning.
    pub records: u32,
    /// Messages listed by the index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed: Option<u32>,
    /// Defects found.
    pub problems: Vec<String>,
    /// What the repair did, if one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repaired: Option<Repair>,
}

/// Outcome of rebuilding a segment.
#[derive(Debug, Serialize)]
pub struct Repair {
    /// Records in the rebuilt index.
    pub records: u32,
    /// Bytes cut from the data file.
    pub truncated: u64,
}

/// Analyzes every segment, repairing damaged ones when `repair` is set.
pub fn run(journal: &Journal, repair: bool) -> JournalResult<Vec<SegmentAnalysis>> {
    let mut results = Vec::new();
    for file in segment_files(journal)? {
        let report = inspect_segment(journal, file.epoch)?;
        let repaired = if repair && !report.is_healthy() {
            let rebuilt = repair_segment(journal, file.epoch)?;
            info!(
                epoch = file.epoch,
                records = rebuilt.records,
                truncated = rebuilt.truncated,
                "segment repaired"
            );
            Some(Repair {
                records: rebuilt.records,
                truncated: rebuilt.truncated,
            })
        } else {
            None
        };
        results.push(SegmentAnalysis {
            file: format!("{:08x}", report.epoch),
            size: report.data_size,
            records: report.records,
            indexed: report.indexed,
            problems: report.problems.iter().map(ToString::to_string).collect(),
            repaired,
        });
    }
    Ok(results)
}

pub(super) fn print_analysis(results: &[SegmentAnalysis], verbose: bool) {
    for result in results {
        println!("  analyzing file: {}", result.file);
        if verbose {
            let indexed = result
                .indexed
                .map_or_else(|| "no index".to_string(), |n| format!("{n} indexed"));
            println!(
                "    {} bytes, {} records, {indexed}",
                result.size, result.records
            );
        }
        if result.problems.is_empty() {
            println!("    ok");
        }
        for problem in &result.problems {
            println!("    {problem}");
        }
        if let Some(repair) = &result.repaired {
            println!(
                "    repaired: {} records indexed, {} bytes truncated",
                repair.records, repair.truncated
            );
        }
    }
}
