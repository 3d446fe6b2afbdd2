//! Command implementations.
//!
//! Every journal given on the command line goes through [`run`], which
//! performs the requested actions in a fixed order and collects the results
//! into a [`JournalReport`]. Failures are recorded in the report so the
//! remaining actions and journals still run.

pub mod analyze;
pub mod segments;
pub mod subscribers;

use analyze::SegmentAnalysis;
use fanlog_core::Journal;
use segments::SegmentEntry;
use serde::Serialize;
use std::path::Path;
use subscribers::{Perspective, SubscriberEntry};

/// What to do with each journal.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Subscriber to register at the oldest message.
    pub add: Option<String>,
    /// Subscriber to erase.
    pub erase: Option<String>,
    /// Subscriber whose perspective to show.
    pub perspective: Option<String>,
    /// List segments.
    pub list: bool,
    /// Include index information in the listing.
    pub index: bool,
    /// Delete segments no subscriber still needs.
    pub clean: bool,
    /// List subscribers.
    pub subscribers: bool,
    /// Analyze data files.
    pub analyze: bool,
    /// Repair damaged segments found by the analysis.
    pub repair: bool,
}

/// Everything learned about one journal.
#[derive(Debug, Default, Serialize)]
pub struct JournalReport {
    /// Journal path.
    pub path: String,
    /// Changes that were made.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    /// Failures, in the order they happened.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Perspective of one subscriber.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perspective: Option<Perspective>,
    /// Subscribers and their checkpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribers: Option<Vec<SubscriberEntry>>,
    /// Segment listing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentEntry>>,
    /// Data file analysis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Vec<SegmentAnalysis>>,
}

impl JournalReport {
    fn new(path: &Path) -> Self {
        Self {
            path: path.display().to_string(),
            ..Self::default()
        }
    }

    fn record<T, E: std::fmt::Display>(&mut self, what: &str, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(path = %self.path, error = %e, "{what} failed");
                self.errors.push(format!("{what}: {e}"));
                None
            }
        }
    }
}

/// Runs every requested action against the journal at `path`.
pub fn run(path: &Path, options: &Options) -> JournalReport {
    let mut report = JournalReport::new(path);
    let Some(journal) = report.record("open", Journal::open(path)) else {
        return report;
    };

    if let Some(name) = &options.add {
        if let Some(id) = report.record("add subscriber", subscribers::add(&journal, name)) {
            report.actions.push(format!("added subscriber {name} @ {id}"));
        }
    }
    if let Some(name) = &options.erase {
        if report.record("erase subscriber", journal.remove_subscriber(name)).is_some() {
            report.actions.push(format!("erased subscriber {name}"));
        }
    }
    if let Some(name) = &options.perspective {
        report.perspective = report.record("perspective", subscribers::perspective(&journal, name));
    }
    if options.subscribers {
        report.subscribers = report.record("list subscribers", subscribers::list(&journal));
    }
    if options.clean {
        if let Some(epochs) = report.record("clean", journal.reclaim()) {
            for epoch in epochs {
                report.actions.push(format!("deleted segment {epoch:08x}"));
            }
        }
    }
    if options.list {
        report.segments = report.record("list segments", segments::list(&journal, options.index));
    }
    if options.analyze {
        report.analysis = report.record("analyze", analyze::run(&journal, options.repair));
    }
    report
}

/// Prints a report for people.
pub fn print_text(report: &JournalReport, verbose: bool) {
    println!("{}", report.path);
    for action in &report.actions {
        println!("  {action}");
    }
    if let Some(perspective) = &report.perspective {
        subscribers::print_perspective(perspective);
    }
    if let Some(entries) = &report.subscribers {
        subscribers::print_list(entries);
    }
    if let Some(entries) = &report.segments {
        segments::print_list(entries, verbose);
    }
    if let Some(entries) = &report.analysis {
        analyze::print_analysis(entries, verbose);
    }
    for error in &report.errors {
        eprintln!("  error: {error}");
    }
}
