//! # fanlog Testkit
//!
//! Test utilities for fanlog.
//!
//! This crate provides:
//! - Temporary journal fixtures and read/write helpers
//! - Property-based test generators using proptest
//! - Crash simulation on real journal directories
//! - Concurrent stress runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fanlog_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_journal() {
//!     with_temp_journal(|journal| {
//!         journal.add_subscriber("a", Position::Begin).unwrap();
//!         write_all(journal, &[b"one".to_vec()]);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use fanlog_core::{Journal, JournalConfig, LogId, Position, Safety};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
