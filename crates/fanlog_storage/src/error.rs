//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Attempted to truncate to a size larger than the current size.
    #[error("cannot truncate to {requested} bytes, storage holds {size}")]
    TruncateBeyondEnd {
        /// The requested new size.
        requested: u64,
        /// The current storage size.
        size: u64,
    },

    /// The backend was opened read-only.
    #[error("storage is read-only")]
    ReadOnly,
}

impl StorageError {
    /// Returns the platform error code behind this error, if any.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_os_error_from_io() {
        let err = StorageError::from(io::Error::from_raw_os_error(28));
        assert_eq!(err.raw_os_error(), Some(28));
    }

    #[test]
    fn raw_os_error_absent_for_logical_errors() {
        let err = StorageError::ReadPastEnd {
            offset: 10,
            len: 4,
            size: 8,
        };
        assert_eq!(err.raw_os_error(), None);
        assert!(err.to_string().contains("offset 10"));
    }
}
