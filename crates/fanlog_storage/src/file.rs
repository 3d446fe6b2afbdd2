//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// This backend provides persistent storage using OS file APIs.
/// Data survives process restarts.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_data()` to ensure data is on disk
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
/// Internal locking ensures consistent access.
///
/// # Example
///
/// ```no_run
/// use fanlog_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("00000000")).unwrap();
/// let offset = backend.append(b"persistent data").unwrap();
/// backend.sync().unwrap();  // Ensure data is durable
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
    read_only: bool,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// If the file exists, it is opened for reading and appending.
    /// If it doesn't exist, a new file is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file, false)
    }

    /// Opens an existing file for reading and appending; never creates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(path, file, false)
    }

    /// Opens an existing file read-only.
    ///
    /// Appends, truncation, and syncs on the returned backend fail with
    /// [`StorageError::ReadOnly`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(path, file, true)
    }

    fn from_file(path: &Path, file: File, read_only: bool) -> StorageResult<Self> {
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
            read_only,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the file at [`FileBackend::path`] is no longer the
    /// one this handle has open.
    ///
    /// That happens when the path was removed, or when another handle
    /// renamed a fresh file over it. Appends through a replaced handle land
    /// in an unlinked file, so callers reopen instead.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be queried.
    pub fn is_replaced(&self) -> StorageResult<bool> {
        let current = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        let open = self.file.read().metadata()?;
        Ok(!same_file(&open, &current))
    }
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

// Without inode numbers, fall back to what a rename usually changes.
#[cfg(not(unix))]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    a.len() == b.len() && a.modified().ok() == b.modified().ok()
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        let mut file = self.file.write();
        file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn refresh(&mut self) -> StorageResult<u64> {
        let len = self.file.read().metadata()?.len();
        *self.size.write() = len;
        Ok(len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let file = self.file.write();
        file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();

        let offset1 = backend.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = backend.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(backend.size().unwrap(), 11);

        let data = backend.read_at(0, 11).unwrap();
        assert_eq!(&data, b"hello world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        {
            let backend = FileBackend::open_read_only(&path).unwrap();
            assert_eq!(backend.size().unwrap(), 15);

            let data = backend.read_at(0, 15).unwrap();
            assert_eq!(&data, b"persistent data");
        }
    }

    #[test]
    fn open_existing_requires_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");
        assert!(FileBackend::open_existing(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.bin");
        FileBackend::open(&path).unwrap().append(b"abc").unwrap();

        let mut backend = FileBackend::open_read_only(&path).unwrap();
        assert!(matches!(backend.append(b"x"), Err(StorageError::ReadOnly)));
        assert!(matches!(backend.truncate(0), Err(StorageError::ReadOnly)));
    }

    #[test]
    fn refresh_observes_other_handle_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.bin");

        let mut writer = FileBackend::open(&path).unwrap();
        let mut reader = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(reader.size().unwrap(), 0);

        writer.append(b"later").unwrap();
        assert!(reader.read_at(0, 5).is_err());

        assert_eq!(reader.refresh().unwrap(), 5);
        assert_eq!(reader.read_at(0, 5).unwrap(), b"later");
    }

    #[test]
    fn rename_over_path_is_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("00000000.idx");
        let staged = dir.path().join("00000000.idx.tmp");

        let backend = FileBackend::open(&path).unwrap();
        assert!(!backend.is_replaced().unwrap());

        fs::write(&staged, b"rebuilt").unwrap();
        fs::rename(&staged, &path).unwrap();
        assert!(backend.is_replaced().unwrap());
        assert!(!FileBackend::open_existing(&path).unwrap().is_replaced().unwrap());
    }

    #[test]
    fn removed_path_counts_as_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.bin");
        let backend = FileBackend::open(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(backend.is_replaced().unwrap());
    }

    #[test]
    fn file_truncate_drops_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello world").unwrap();
        backend.truncate(5).unwrap();
        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(backend.append(b"!").unwrap(), 5);
        assert_eq!(backend.read_at(0, 6).unwrap(), b"hello!");

        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd { .. })
        ));
    }

    #[test]
    fn file_empty_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"x").unwrap();

        let offset = backend.append(b"").unwrap();
        assert_eq!(offset, 1);
        assert_eq!(backend.size().unwrap(), 1);
    }

    mod properties {
        use super::*;
        use proptest::collection::vec;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn chunks_read_back_at_their_offsets(
                chunks in vec(vec(any::<u8>(), 0..64), 1..8),
            ) {
                let dir = tempdir().unwrap();
                let path = dir.path().join("chunks.bin");
                let mut writer = FileBackend::open(&path).unwrap();
                let offsets: Vec<u64> = chunks
                    .iter()
                    .map(|chunk| writer.append(chunk).unwrap())
                    .collect();

                let mut reader = FileBackend::open_read_only(&path).unwrap();
                let total: usize = chunks.iter().map(Vec::len).sum();
                prop_assert_eq!(reader.refresh().unwrap(), total as u64);
                for (chunk, offset) in chunks.iter().zip(offsets) {
                    prop_assert_eq!(&reader.read_at(offset, chunk.len()).unwrap(), chunk);
                }
            }

            #[test]
            fn append_after_truncate_continues_at_cut(
                data in vec(any::<u8>(), 1..256),
                cut in any::<prop::sample::Index>(),
                tail in vec(any::<u8>(), 1..32),
            ) {
                let dir = tempdir().unwrap();
                let mut backend = FileBackend::open(&dir.path().join("t.bin")).unwrap();
                backend.append(&data).unwrap();

                let keep = cut.index(data.len() + 1) as u64;
                backend.truncate(keep).unwrap();
                prop_assert_eq!(backend.append(&tail).unwrap(), keep);
                prop_assert_eq!(
                    backend.read_at(keep, tail.len()).unwrap(),
                    tail.clone()
                );
                prop_assert!(backend.read_at(keep, tail.len() + 1).is_err());
            }
        }
    }
}
