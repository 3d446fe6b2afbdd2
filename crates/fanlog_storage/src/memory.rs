//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory byte store.
///
/// Handles made with [`InMemoryBackend::share`] see the same bytes, like two
/// processes with the same file open. Each handle caches its own size, so
/// appends made through another handle become visible only after
/// [`StorageBackend::refresh`], as with [`crate::FileBackend`].
///
/// # Example
///
/// ```rust
/// use fanlog_storage::{StorageBackend, InMemoryBackend};
///
/// let mut writer = InMemoryBackend::new();
/// let mut reader = writer.share();
/// writer.append(b"test data").unwrap();
///
/// assert_eq!(reader.size().unwrap(), 0);
/// assert_eq!(reader.refresh().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: Arc<RwLock<Vec<u8>>>,
    size: u64,
}

impl InMemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `bytes`, for example a torn segment image.
    #[must_use]
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
            size,
        }
    }

    /// Opens another handle on the same bytes.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            bytes: Arc::clone(&self.bytes),
            size: self.size,
        }
    }

    /// Returns a copy of everything stored, ignoring the cached size.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if end > self.size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.size,
            });
        }
        let bytes = self.bytes.read();
        // Shrunk through another handle since the last refresh.
        let Some(slice) = bytes.get(offset as usize..end as usize) else {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: bytes.len() as u64,
            });
        };
        Ok(slice.to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        self.size = bytes.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn refresh(&mut self) -> StorageResult<u64> {
        self.size = self.bytes.read().len() as u64;
        Ok(self.size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        let current = bytes.len() as u64;
        if new_size > current {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: current,
            });
        }
        bytes.truncate(new_size as usize);
        self.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_return_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"abc").unwrap(), 0);
        assert_eq!(backend.append(b"de").unwrap(), 3);
        assert_eq!(backend.read_at(1, 3).unwrap(), b"bcd");
        assert_eq!(backend.size().unwrap(), 5);
    }

    #[test]
    fn reads_stop_at_cached_size() {
        let mut writer = InMemoryBackend::with_bytes(b"head".to_vec());
        let mut reader = writer.share();
        writer.append(b"tail").unwrap();

        assert!(matches!(
            reader.read_at(4, 4),
            Err(StorageError::ReadPastEnd { size: 4, .. })
        ));
        reader.refresh().unwrap();
        assert_eq!(reader.read_at(4, 4).unwrap(), b"tail");
    }

    #[test]
    fn truncate_through_one_handle() {
        let mut a = InMemoryBackend::with_bytes(b"committed torn".to_vec());
        let mut b = a.share();
        a.truncate(9).unwrap();

        assert_eq!(a.snapshot(), b"committed");
        // `b` still believes in the old size until it refreshes.
        assert!(b.read_at(9, 5).is_err());
        assert_eq!(b.refresh().unwrap(), 9);
    }

    #[test]
    fn truncate_cannot_grow() {
        let mut backend = InMemoryBackend::with_bytes(vec![0; 4]);
        assert!(matches!(
            backend.truncate(8),
            Err(StorageError::TruncateBeyondEnd { requested: 8, size: 4 })
        ));
    }

    #[test]
    fn zero_length_read_at_end() {
        let backend = InMemoryBackend::with_bytes(b"xy".to_vec());
        assert!(backend.read_at(2, 0).unwrap().is_empty());
    }

    mod properties {
        use super::*;
        use proptest::collection::vec;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn shared_handle_sees_appends_after_refresh(
                chunks in vec(vec(any::<u8>(), 1..32), 1..16),
            ) {
                let mut writer = InMemoryBackend::new();
                let mut reader = writer.share();
                let mut expected = Vec::new();

                for chunk in &chunks {
                    let before = reader.size().unwrap();
                    let offset = writer.append(chunk).unwrap();
                    prop_assert_eq!(offset, expected.len() as u64);
                    expected.extend_from_slice(chunk);

                    prop_assert_eq!(reader.size().unwrap(), before);
                    prop_assert_eq!(reader.refresh().unwrap(), expected.len() as u64);
                    prop_assert_eq!(&reader.read_at(offset, chunk.len()).unwrap(), chunk);
                }
                prop_assert_eq!(writer.snapshot(), expected);
            }
        }
    }
}
