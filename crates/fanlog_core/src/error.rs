//! Error types for the journal engine.

use crate::types::LogId;
use fanlog_storage::StorageError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Stable classification of journal failures.
///
/// The integer codes are part of the C ABI and of the legacy last-error
/// surface; `Success` is code 0 and never attached to a [`JournalError`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No error.
    Success = 0,
    /// The handle was already initialized or opened.
    IllegalInit = 1,
    /// Operation invoked on a handle in the wrong state.
    IllegalOpen = 2,
    /// The journal could not be opened.
    Open = 3,
    /// The journal path is not a directory.
    NotADirectory = 4,
    /// The journal path is too long.
    CreatePathLen = 5,
    /// The journal already exists.
    CreateExists = 6,
    /// The journal directory could not be created.
    CreateMkdir = 7,
    /// The metadata file could not be created.
    CreateMeta = 8,
    /// Advisory lock contention or failure.
    Lock = 9,
    /// An index file could not be opened.
    IndexOpen = 10,
    /// An index file could not be repositioned.
    IndexSeek = 11,
    /// An index file is inconsistent.
    IndexCorrupt = 12,
    /// An index file could not be written.
    IndexWrite = 13,
    /// An index file could not be read.
    IndexRead = 14,
    /// A segment file could not be opened.
    SegmentOpen = 15,
    /// A segment file could not be repositioned.
    SegmentSeek = 16,
    /// A segment file is inconsistent.
    SegmentCorrupt = 17,
    /// A segment file could not be read.
    SegmentRead = 18,
    /// A segment file could not be written.
    SegmentWrite = 19,
    /// The metadata file could not be read.
    MetaOpen = 20,
    /// Write attempted on a handle not open for writing.
    IllegalWrite = 21,
    /// Checkpoint beyond delivered data or behind the current one.
    IllegalCheckpoint = 22,
    /// Unknown subscriber.
    InvalidSubscriber = 23,
    /// Log id outside the valid range.
    IllegalLogId = 24,
    /// Subscriber already registered.
    SubscriberExists = 25,
    /// A checkpoint record could not be read or written.
    CheckpointFailed = 26,
    /// Operation not supported.
    NotSupported = 27,
}

impl ErrorKind {
    const ALL: [Self; 28] = [
        Self::Success,
        Self::IllegalInit,
        Self::IllegalOpen,
        Self::Open,
        Self::NotADirectory,
        Self::CreatePathLen,
        Self::CreateExists,
        Self::CreateMkdir,
        Self::CreateMeta,
        Self::Lock,
        Self::IndexOpen,
        Self::IndexSeek,
        Self::IndexCorrupt,
        Self::IndexWrite,
        Self::IndexRead,
        Self::SegmentOpen,
        Self::SegmentSeek,
        Self::SegmentCorrupt,
        Self::SegmentRead,
        Self::SegmentWrite,
        Self::MetaOpen,
        Self::IllegalWrite,
        Self::IllegalCheckpoint,
        Self::InvalidSubscriber,
        Self::IllegalLogId,
        Self::SubscriberExists,
        Self::CheckpointFailed,
        Self::NotSupported,
    ];

    /// Returns the stable integer code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Looks up a kind by its integer code.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Returns the upper-case name used by the legacy error strings.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::IllegalInit => "ILLEGAL_INIT",
            Self::IllegalOpen => "ILLEGAL_OPEN",
            Self::Open => "OPEN",
            Self::NotADirectory => "NOTDIR",
            Self::CreatePathLen => "CREATE_PATHLEN",
            Self::CreateExists => "CREATE_EXISTS",
            Self::CreateMkdir => "CREATE_MKDIR",
            Self::CreateMeta => "CREATE_META",
            Self::Lock => "LOCK",
            Self::IndexOpen => "IDX_OPEN",
            Self::IndexSeek => "IDX_SEEK",
            Self::IndexCorrupt => "IDX_CORRUPT",
            Self::IndexWrite => "IDX_WRITE",
            Self::IndexRead => "IDX_READ",
            Self::SegmentOpen => "FILE_OPEN",
            Self::SegmentSeek => "FILE_SEEK",
            Self::SegmentCorrupt => "FILE_CORRUPT",
            Self::SegmentRead => "FILE_READ",
            Self::SegmentWrite => "FILE_WRITE",
            Self::MetaOpen => "META_OPEN",
            Self::IllegalWrite => "ILLEGAL_WRITE",
            Self::IllegalCheckpoint => "ILLEGAL_CHECKPOINT",
            Self::InvalidSubscriber => "INVALID_SUBSCRIBER",
            Self::IllegalLogId => "ILLEGAL_LOGID",
            Self::SubscriberExists => "SUBSCRIBER_EXISTS",
            Self::CheckpointFailed => "CHECKPOINT",
            Self::NotSupported => "NOT_SUPPORTED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// File-level fault on an index or segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFault {
    /// Opening or creating the file.
    Open,
    /// Repositioning or truncating the file.
    Seek,
    /// Reading from the file.
    Read,
    /// Appending to or syncing the file.
    Write,
}

impl fmt::Display for FileFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Seek => "seek",
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Errors that can occur in journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The handle cannot be initialized in its current state.
    #[error("illegal init: {reason}")]
    IllegalInit {
        /// Why initialization was refused.
        reason: String,
    },

    /// The operation is not valid in the handle's current state.
    #[error("illegal open: {reason}")]
    IllegalOpen {
        /// Why the operation was refused.
        reason: String,
    },

    /// The journal directory could not be opened.
    #[error("cannot open journal at {path:?}: {source}")]
    Open {
        /// The journal path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The journal path exists but is not a directory.
    #[error("{path:?} is not a directory")]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// The journal path or a derived file name is too long.
    #[error("path too long: {path:?}")]
    CreatePathLen {
        /// The offending path.
        path: PathBuf,
    },

    /// The journal is already initialized.
    #[error("journal already exists at {path:?}")]
    CreateExists {
        /// The journal path.
        path: PathBuf,
    },

    /// Creating the journal directory failed.
    #[error("cannot create journal directory {path:?}: {source}")]
    CreateMkdir {
        /// The journal path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Writing the initial metadata or first segment failed.
    #[error("cannot create journal metadata in {path:?}: {source}")]
    CreateMeta {
        /// The journal path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An advisory lock could not be taken.
    #[error("cannot lock {path:?}: {source}")]
    Lock {
        /// The lock file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An index file operation failed.
    #[error("index {fault} failed for epoch {epoch:08x}: {source}")]
    Index {
        /// Which operation failed.
        fault: FileFault,
        /// The segment epoch.
        epoch: u32,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },

    /// An index file is inconsistent with its segment.
    #[error("index corruption in epoch {epoch:08x}: {message}")]
    IndexCorrupt {
        /// The segment epoch.
        epoch: u32,
        /// Description of the corruption.
        message: String,
    },

    /// A segment data file operation failed.
    #[error("segment {fault} failed for epoch {epoch:08x}: {source}")]
    Segment {
        /// Which operation failed.
        fault: FileFault,
        /// The segment epoch.
        epoch: u32,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },

    /// A segment data file is missing data or holds invalid records.
    #[error("segment corruption in epoch {epoch:08x}: {message}")]
    SegmentCorrupt {
        /// The segment epoch.
        epoch: u32,
        /// Description of the corruption.
        message: String,
    },

    /// The metadata file is missing, unreadable, or invalid.
    #[error("cannot read journal metadata {path:?}: {source}")]
    MetaOpen {
        /// The metadata file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Write attempted on a handle that is not open for writing.
    #[error("illegal write: {reason}")]
    IllegalWrite {
        /// Why the write was refused.
        reason: String,
    },

    /// Checkpoint outside the delivered range.
    #[error("illegal checkpoint {requested}: {reason}")]
    IllegalCheckpoint {
        /// The requested checkpoint.
        requested: LogId,
        /// Why it was refused.
        reason: String,
    },

    /// The subscriber is not registered.
    #[error("invalid subscriber {name:?}")]
    InvalidSubscriber {
        /// The subscriber name.
        name: String,
    },

    /// Log id outside the valid range.
    #[error("illegal log id {id}: {reason}")]
    IllegalLogId {
        /// The offending id.
        id: LogId,
        /// Why it is invalid.
        reason: String,
    },

    /// The subscriber is already registered.
    #[error("subscriber {name:?} already exists")]
    SubscriberExists {
        /// The subscriber name.
        name: String,
    },

    /// Reading or writing a checkpoint record failed.
    #[error("checkpoint of {name:?} failed: {source}")]
    CheckpointFailed {
        /// The subscriber name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The operation is not supported.
    #[error("not supported: {what}")]
    NotSupported {
        /// What was attempted.
        what: String,
    },
}

impl JournalError {
    /// Returns the stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalInit { .. } => ErrorKind::IllegalInit,
            Self::IllegalOpen { .. } => ErrorKind::IllegalOpen,
            Self::Open { .. } => ErrorKind::Open,
            Self::NotADirectory { .. } => ErrorKind::NotADirectory,
            Self::CreatePathLen { .. } => ErrorKind::CreatePathLen,
            Self::CreateExists { .. } => ErrorKind::CreateExists,
            Self::CreateMkdir { .. } => ErrorKind::CreateMkdir,
            Self::CreateMeta { .. } => ErrorKind::CreateMeta,
            Self::Lock { .. } => ErrorKind::Lock,
            Self::Index { fault, .. } => match fault {
                FileFault::Open => ErrorKind::IndexOpen,
                FileFault::Seek => ErrorKind::IndexSeek,
                FileFault::Read => ErrorKind::IndexRead,
                FileFault::Write => ErrorKind::IndexWrite,
            },
            Self::IndexCorrupt { .. } => ErrorKind::IndexCorrupt,
            Self::Segment { fault, .. } => match fault {
                FileFault::Open => ErrorKind::SegmentOpen,
                FileFault::Seek => ErrorKind::SegmentSeek,
                FileFault::Read => ErrorKind::SegmentRead,
                FileFault::Write => ErrorKind::SegmentWrite,
            },
            Self::SegmentCorrupt { .. } => ErrorKind::SegmentCorrupt,
            Self::MetaOpen { .. } => ErrorKind::MetaOpen,
            Self::IllegalWrite { .. } => ErrorKind::IllegalWrite,
            Self::IllegalCheckpoint { .. } => ErrorKind::IllegalCheckpoint,
            Self::InvalidSubscriber { .. } => ErrorKind::InvalidSubscriber,
            Self::IllegalLogId { .. } => ErrorKind::IllegalLogId,
            Self::SubscriberExists { .. } => ErrorKind::SubscriberExists,
            Self::CheckpointFailed { .. } => ErrorKind::CheckpointFailed,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
        }
    }

    /// Returns the platform error code behind this error, or 0.
    #[must_use]
    pub fn errno(&self) -> i32 {
        let code = match self {
            Self::Open { source, .. }
            | Self::CreateMkdir { source, .. }
            | Self::CreateMeta { source, .. }
            | Self::Lock { source, .. }
            | Self::MetaOpen { source, .. }
            | Self::CheckpointFailed { source, .. } => source.raw_os_error(),
            Self::Index { source, .. } | Self::Segment { source, .. } => source.raw_os_error(),
            _ => None,
        };
        code.unwrap_or(0)
    }

    /// Creates an illegal init error.
    pub fn illegal_init(reason: impl Into<String>) -> Self {
        Self::IllegalInit {
            reason: reason.into(),
        }
    }

    /// Creates an illegal open error.
    pub fn illegal_open(reason: impl Into<String>) -> Self {
        Self::IllegalOpen {
            reason: reason.into(),
        }
    }

    /// Creates an illegal write error.
    pub fn illegal_write(reason: impl Into<String>) -> Self {
        Self::IllegalWrite {
            reason: reason.into(),
        }
    }

    /// Creates an illegal checkpoint error.
    pub fn illegal_checkpoint(requested: LogId, reason: impl Into<String>) -> Self {
        Self::IllegalCheckpoint {
            requested,
            reason: reason.into(),
        }
    }

    /// Creates an illegal log id error.
    pub fn illegal_log_id(id: LogId, reason: impl Into<String>) -> Self {
        Self::IllegalLogId {
            id,
            reason: reason.into(),
        }
    }

    /// Creates an invalid subscriber error.
    pub fn invalid_subscriber(name: impl Into<String>) -> Self {
        Self::InvalidSubscriber { name: name.into() }
    }

    /// Creates an index fault error.
    pub fn index(fault: FileFault, epoch: u32, source: impl Into<StorageError>) -> Self {
        Self::Index {
            fault,
            epoch,
            source: source.into(),
        }
    }

    /// Creates an index corruption error.
    pub fn index_corrupt(epoch: u32, message: impl Into<String>) -> Self {
        Self::IndexCorrupt {
            epoch,
            message: message.into(),
        }
    }

    /// Creates a segment fault error.
    pub fn segment(fault: FileFault, epoch: u32, source: impl Into<StorageError>) -> Self {
        Self::Segment {
            fault,
            epoch,
            source: source.into(),
        }
    }

    /// Creates a segment corruption error.
    pub fn segment_corrupt(epoch: u32, message: impl Into<String>) -> Self {
        Self::SegmentCorrupt {
            epoch,
            message: message.into(),
        }
    }

    /// Creates a not supported error.
    pub fn not_supported(what: impl Into<String>) -> Self {
        Self::NotSupported { what: what.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::Success.code(), 0);
        assert_eq!(ErrorKind::IllegalInit.code(), 1);
        assert_eq!(ErrorKind::Lock.code(), 9);
        assert_eq!(ErrorKind::SegmentCorrupt.code(), 17);
        assert_eq!(ErrorKind::NotSupported.code(), 27);
    }

    #[test]
    fn from_code_inverts_code() {
        for code in 0..28 {
            assert_eq!(ErrorKind::from_code(code).unwrap().code(), code);
        }
        assert!(ErrorKind::from_code(-1).is_none());
        assert!(ErrorKind::from_code(28).is_none());
    }

    #[test]
    fn fault_selects_kind() {
        let err = JournalError::index(FileFault::Write, 3, io::Error::from_raw_os_error(28));
        assert_eq!(err.kind(), ErrorKind::IndexWrite);
        assert_eq!(err.errno(), 28);

        let err = JournalError::segment(FileFault::Open, 3, io::Error::from_raw_os_error(2));
        assert_eq!(err.kind(), ErrorKind::SegmentOpen);
        assert_eq!(err.errno(), 2);
    }

    #[test]
    fn logical_errors_have_no_errno() {
        let err = JournalError::invalid_subscriber("ghost");
        assert_eq!(err.kind(), ErrorKind::InvalidSubscriber);
        assert_eq!(err.errno(), 0);
        assert!(err.to_string().contains("ghost"));
    }
}
