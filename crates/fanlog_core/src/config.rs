//! Journal configuration.

use crate::types::Safety;

/// Default maximum size of a segment data file.
pub const DEFAULT_SEGMENT_SIZE: u64 = 4 * 1024 * 1024;

/// Default permission bits for journal files.
pub const DEFAULT_FILE_MODE: u32 = 0o640;

/// Default cap on messages returned by one read interval.
pub const DEFAULT_MAX_BATCH: u32 = 4096;

/// Default number of appends between periodic syncs at `AlmostSafe`.
pub const DEFAULT_SYNC_INTERVAL: u32 = 256;

/// Configuration for creating or opening a journal.
///
/// `safety`, `segment_size`, `file_mode` and `max_batch` are persisted in the
/// metastore when the journal is initialized; later opens read them back
/// from disk. `sync_interval` and `fail_if_exists` only affect the handle
/// they are passed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalConfig {
    /// Durability level for appends.
    pub safety: Safety,

    /// Maximum size of a segment data file before rollover.
    pub segment_size: u64,

    /// Permission bits for files created in the journal.
    pub file_mode: u32,

    /// Maximum messages per read interval.
    pub max_batch: u32,

    /// Appends between forced syncs when `safety` is `AlmostSafe`.
    pub sync_interval: u32,

    /// Whether initializing an existing journal is an error.
    pub fail_if_exists: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            safety: Safety::AlmostSafe,
            segment_size: DEFAULT_SEGMENT_SIZE,
            file_mode: DEFAULT_FILE_MODE,
            max_batch: DEFAULT_MAX_BATCH,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            fail_if_exists: true,
        }
    }
}

impl JournalConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the durability level.
    #[must_use]
    pub const fn safety(mut self, safety: Safety) -> Self {
        self.safety = safety;
        self
    }

    /// Sets the maximum segment size.
    #[must_use]
    pub const fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the permission bits for created files.
    #[must_use]
    pub const fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    /// Sets the read batch cap.
    #[must_use]
    pub const fn max_batch(mut self, count: u32) -> Self {
        self.max_batch = count;
        self
    }

    /// Sets the periodic sync interval.
    #[must_use]
    pub const fn sync_interval(mut self, appends: u32) -> Self {
        self.sync_interval = appends;
        self
    }

    /// Sets whether initializing an existing journal fails.
    #[must_use]
    pub const fn fail_if_exists(mut self, value: bool) -> Self {
        self.fail_if_exists = value;
        self
    }

    /// Permission bits for directories: file bits plus search where read is
    /// granted.
    #[must_use]
    pub const fn dir_mode(&self) -> u32 {
        self.file_mode | ((self.file_mode & 0o444) >> 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = JournalConfig::default();
        assert_eq!(config.safety, Safety::AlmostSafe);
        assert_eq!(config.segment_size, 4 * 1024 * 1024);
        assert_eq!(config.file_mode, 0o640);
        assert!(config.fail_if_exists);
    }

    #[test]
    fn builder_pattern() {
        let config = JournalConfig::new()
            .safety(Safety::Safe)
            .segment_size(1024)
            .max_batch(10)
            .fail_if_exists(false);

        assert_eq!(config.safety, Safety::Safe);
        assert_eq!(config.segment_size, 1024);
        assert_eq!(config.max_batch, 10);
        assert!(!config.fail_if_exists);
    }

    #[test]
    fn dir_mode_adds_search_bits() {
        assert_eq!(JournalConfig::new().file_mode(0o640).dir_mode(), 0o750);
        assert_eq!(JournalConfig::new().file_mode(0o600).dir_mode(), 0o700);
        assert_eq!(JournalConfig::new().file_mode(0o644).dir_mode(), 0o755);
    }
}
