//! fanlog CLI
//!
//! Maintenance tool for fanlog journals.
//!
//! # Options
//!
//! - `-a <sub>` - Register a subscriber at the oldest retained message
//! - `-e <sub>` - Erase a subscriber
//! - `-p <sub>` - Show a subscriber's checkpoint and next interval
//! - `-l` - List segments with sizes and pending readers
//! - `-i` - Like `-l`, with index information
//! - `-c` - Delete segments no subscriber still needs
//! - `-s` - List subscribers and their checkpoints
//! - `-d` - Analyze data files
//! - `-r` - Analyze data files and repair damaged segments

mod commands;

use clap::{Parser, ValueEnum};
use commands::Options;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// fanlog journal maintenance.
#[derive(Parser)]
#[command(name = "fanlog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Register a subscriber at the oldest retained message
    #[arg(short = 'a', long = "add", value_name = "SUB")]
    add: Option<String>,

    /// Erase a subscriber
    #[arg(short = 'e', long = "erase", value_name = "SUB")]
    erase: Option<String>,

    /// Show what a subscriber would read next
    #[arg(short = 'p', long = "perspective", value_name = "SUB")]
    perspective: Option<String>,

    /// List segments
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// List segments with index information
    #[arg(short = 'i', long = "index")]
    index: bool,

    /// Delete segments with no pending readers
    #[arg(short = 'c', long = "clean")]
    clean: bool,

    /// List subscribers
    #[arg(short = 's', long = "subscribers")]
    subscribers: bool,

    /// Analyze data files
    #[arg(short = 'd', long = "analyze")]
    analyze: bool,

    /// Analyze data files and repair what is damaged
    #[arg(short = 'r', long = "repair")]
    repair: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Journal directories
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            add: self.add.clone(),
            erase: self.erase.clone(),
            perspective: self.perspective.clone(),
            list: self.list || self.index,
            index: self.index,
            clean: self.clean,
            subscribers: self.subscribers,
            analyze: self.analyze || self.repair,
            repair: self.repair,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with reports
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = cli.options();
    let mut failed = 0usize;
    for path in &cli.paths {
        let report = commands::run(path, &options);
        match cli.format {
            Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            Format::Text => commands::print_text(&report, cli.verbose),
        }
        if !report.errors.is_empty() {
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(format!("{failed} of {} journals reported errors", cli.paths.len()).into());
    }
    Ok(())
}
