//! # fanlog Storage
//!
//! Storage backend trait and implementations for fanlog.
//!
//! This crate provides the lowest-level storage abstraction used by the
//! journal engine. Storage backends are **opaque byte stores** - they do not
//! interpret the data they store.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush, sync)
//! - No knowledge of segment headers, index entries, or checkpoints
//! - Must be `Send + Sync` for concurrent access
//! - The journal engine owns all file format interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use fanlog_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
