//! Journal directory management.
//!
//! This module handles the file system layout of a journal:
//!
//! ```text
//! <journal>/
//! ├─ metastore          # Journal-wide settings and current epoch
//! ├─ writer.lock        # Advisory lock serializing appends
//! ├─ meta.lock          # Advisory lock serializing subscriber changes
//! ├─ 00000000           # Segment data file for epoch 0
//! ├─ 00000000.idx       # Its index
//! ├─ cp.<hex name>      # Checkpoint of one subscriber
//! └─ cp.<hex name>.lock # Held by that subscriber's open reader
//! ```
//!
//! Every piece of mutable state is re-derived from these files, so any
//! number of handles in any number of processes can share a journal.

use crate::error::{JournalError, JournalResult};
use crate::meta::Metastore;
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// File names within the journal directory.
const META_FILE: &str = "metastore";
const META_TEMP: &str = "metastore.tmp";
const WRITER_LOCK: &str = "writer.lock";
const META_LOCK: &str = "meta.lock";
const CHECKPOINT_PREFIX: &str = "cp.";
const INDEX_SUFFIX: &str = ".idx";
const TEMP_SUFFIX: &str = ".tmp";
const LOCK_SUFFIX: &str = ".lock";

/// Longest path the journal will create.
pub const MAX_PATH_LEN: usize = 1024;

/// Handle on a journal directory.
///
/// Holds no locks by itself; see [`DirLock`].
#[derive(Debug, Clone)]
pub struct JournalDir {
    path: PathBuf,
    file_mode: u32,
}

impl JournalDir {
    /// Creates the journal directory if it does not exist.
    ///
    /// Returns the handle and whether the directory was newly created.
    ///
    /// # Errors
    ///
    /// - `CreatePathLen` if the path leaves no room for journal file names
    /// - `NotADirectory` if the path exists and is not a directory
    /// - `CreateMkdir` if the directory cannot be created
    pub fn create(path: &Path, file_mode: u32, dir_mode: u32) -> JournalResult<(Self, bool)> {
        check_path_len(path, "00000000.idx")?;

        let created = match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => false,
            Ok(_) => {
                return Err(JournalError::NotADirectory {
                    path: path.to_path_buf(),
                })
            }
            Err(_) => {
                make_dir(path, dir_mode).map_err(|source| JournalError::CreateMkdir {
                    path: path.to_path_buf(),
                    source,
                })?;
                true
            }
        };

        Ok((
            Self {
                path: path.to_path_buf(),
                file_mode,
            },
            created,
        ))
    }

    /// Opens an existing journal directory.
    ///
    /// # Errors
    ///
    /// - `Open` if the directory does not exist
    /// - `NotADirectory` if the path is not a directory
    /// - `CreatePathLen` if the path is too long
    pub fn open(path: &Path) -> JournalResult<Self> {
        check_path_len(path, "00000000.idx")?;

        let meta = fs::metadata(path).map_err(|source| JournalError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(JournalError::NotADirectory {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            file_mode: crate::config::DEFAULT_FILE_MODE,
        })
    }

    /// Sets the permission bits used for files created from now on.
    pub fn set_file_mode(&mut self, mode: u32) {
        self.file_mode = mode;
    }

    /// Returns the permission bits for created files.
    #[must_use]
    pub fn file_mode(&self) -> u32 {
        self.file_mode
    }

    /// Returns the path to the journal directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the metastore.
    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.path.join(META_FILE)
    }

    /// Returns the path to the segment data file of `epoch`.
    #[must_use]
    pub fn segment_path(&self, epoch: u32) -> PathBuf {
        self.path.join(format!("{epoch:08x}"))
    }

    /// Returns the path to the index file of `epoch`.
    #[must_use]
    pub fn index_path(&self, epoch: u32) -> PathBuf {
        self.path.join(format!("{epoch:08x}{INDEX_SUFFIX}"))
    }

    /// Returns the staging path of a segment being created.
    #[must_use]
    pub fn segment_temp_path(&self, epoch: u32) -> PathBuf {
        self.path.join(format!("{epoch:08x}{TEMP_SUFFIX}"))
    }

    /// Returns the checkpoint path of a subscriber.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSubscriber` for an empty name and `CreatePathLen` if
    /// the encoded name does not fit.
    pub fn checkpoint_path(&self, subscriber: &str) -> JournalResult<PathBuf> {
        if subscriber.is_empty() {
            return Err(JournalError::invalid_subscriber(subscriber));
        }
        let name = format!("{CHECKPOINT_PREFIX}{}", encode_name(subscriber));
        check_path_len(&self.path, &format!("{name}{LOCK_SUFFIX}"))?;
        Ok(self.path.join(name))
    }

    /// Returns the path of the lock held by a subscriber's reader.
    ///
    /// # Errors
    ///
    /// Same as [`JournalDir::checkpoint_path`].
    pub fn checkpoint_lock_path(&self, subscriber: &str) -> JournalResult<PathBuf> {
        let mut path = self.checkpoint_path(subscriber)?.into_os_string();
        path.push(LOCK_SUFFIX);
        Ok(PathBuf::from(path))
    }

    /// Opens the lock serializing appends.
    ///
    /// # Errors
    ///
    /// Returns `Lock` if the lock file cannot be opened.
    pub fn writer_lock(&self) -> JournalResult<DirLock> {
        DirLock::open(&self.path.join(WRITER_LOCK), self.file_mode)
    }

    /// Opens the lock serializing subscriber changes and reclamation.
    ///
    /// # Errors
    ///
    /// Returns `Lock` if the lock file cannot be opened.
    pub fn meta_lock(&self) -> JournalResult<DirLock> {
        DirLock::open(&self.path.join(META_LOCK), self.file_mode)
    }

    /// Returns whether the journal has been initialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.meta_path().exists()
    }

    /// Loads the metastore.
    ///
    /// # Errors
    ///
    /// Returns `MetaOpen` if the file is missing, unreadable, or invalid.
    pub fn load_meta(&self) -> JournalResult<Metastore> {
        let path = self.meta_path();
        let read = || -> io::Result<Metastore> {
            let mut data = Vec::new();
            File::open(&path)?.read_to_end(&mut data)?;
            Metastore::decode(&data)
        };
        read().map_err(|source| JournalError::MetaOpen {
            path: path.clone(),
            source,
        })
    }

    /// Saves the metastore atomically.
    ///
    /// # Errors
    ///
    /// Returns `MetaOpen` if the file cannot be written.
    pub fn save_meta(&self, meta: &Metastore) -> JournalResult<()> {
        self.write_atomic(&self.path.join(META_TEMP), &self.meta_path(), &meta.encode())
            .map_err(|source| JournalError::MetaOpen {
                path: self.meta_path(),
                source,
            })
    }

    /// Replaces `target` with `data` atomically.
    ///
    /// Uses the write-then-rename pattern for crash safety:
    /// 1. Write to `temp`
    /// 2. Sync `temp` to disk
    /// 3. Rename `temp` over `target`
    /// 4. Fsync the directory so the rename is durable
    pub fn write_atomic(&self, temp: &Path, target: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = create_file(temp, self.file_mode, true)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(temp, target)?;
        self.sync_directory()
    }

    /// Syncs the journal directory so that creates, renames and deletes are
    /// durable.
    ///
    /// Windows NTFS journals metadata itself, so this is a no-op there.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> io::Result<()> {
        File::open(&self.path)?.sync_all()
    }

    #[cfg(not(unix))]
    #[allow(missing_docs)]
    pub fn sync_directory(&self) -> io::Result<()> {
        Ok(())
    }

    /// Lists the epochs that have a segment data file, ascending.
    ///
    /// # Errors
    ///
    /// Returns `Open` if the directory cannot be listed.
    pub fn segment_epochs(&self) -> JournalResult<Vec<u32>> {
        let mut epochs: Vec<u32> = self
            .file_names()?
            .iter()
            .filter_map(|name| parse_epoch(name))
            .collect();
        epochs.sort_unstable();
        Ok(epochs)
    }

    /// Lists the registered subscribers, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns `Open` if the directory cannot be listed.
    pub fn subscriber_names(&self) -> JournalResult<Vec<String>> {
        let mut names: Vec<String> = self
            .file_names()?
            .iter()
            .filter_map(|name| name.strip_prefix(CHECKPOINT_PREFIX))
            .filter(|rest| !rest.ends_with(LOCK_SUFFIX) && !rest.ends_with(TEMP_SUFFIX))
            .filter_map(decode_name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Total size in bytes of all segment data files.
    ///
    /// # Errors
    ///
    /// Returns `Open` if the directory cannot be listed.
    pub fn raw_size(&self) -> JournalResult<u64> {
        let mut total = 0;
        for epoch in self.segment_epochs()? {
            // Segments may be reclaimed while we walk.
            if let Ok(meta) = fs::metadata(self.segment_path(epoch)) {
                total += meta.len();
            }
        }
        Ok(total)
    }

    fn file_names(&self) -> JournalResult<Vec<String>> {
        let open_err = |source| JournalError::Open {
            path: self.path.clone(),
            source,
        };
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(open_err)? {
            let entry = entry.map_err(open_err)?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

/// An advisory lock file in the journal directory.
///
/// The lock is exclusive between open handles of the file, including
/// handles in the same process, and is released when the guard drops or
/// the `DirLock` itself is dropped. File locks belong to the open handle,
/// so threads sharing one `DirLock` are serialized by an inner mutex.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    file: File,
    local: Mutex<()>,
}

impl DirLock {
    /// Opens (creating if needed) the lock file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Lock` if the file cannot be opened.
    pub fn open(path: &Path, mode: u32) -> JournalResult<Self> {
        let file = create_file(path, mode, false).map_err(|source| JournalError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            local: Mutex::new(()),
        })
    }

    /// Blocks until the lock is held.
    ///
    /// # Errors
    ///
    /// Returns `Lock` if locking fails.
    pub fn acquire(&self) -> JournalResult<LockGuard<'_>> {
        let local = self.local.lock();
        self.file.lock_exclusive().map_err(|source| self.error(source))?;
        Ok(LockGuard {
            lock: self,
            _local: local,
        })
    }

    /// Takes the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Lock` if another handle holds the lock.
    pub fn try_acquire(&self) -> JournalResult<LockGuard<'_>> {
        let local = self
            .local
            .try_lock()
            .ok_or_else(|| self.error(io::ErrorKind::WouldBlock.into()))?;
        self.file
            .try_lock_exclusive()
            .map_err(|source| self.error(source))?;
        Ok(LockGuard {
            lock: self,
            _local: local,
        })
    }

    /// Takes the lock without waiting and keeps it until `self` drops.
    ///
    /// # Errors
    ///
    /// Returns `Lock` if another handle holds the lock.
    pub fn try_hold(self) -> JournalResult<Self> {
        self.file
            .try_lock_exclusive()
            .map_err(|source| self.error(source))?;
        Ok(self)
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, source: io::Error) -> JournalError {
        JournalError::Lock {
            path: self.path.clone(),
            source,
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Scoped hold on a [`DirLock`].
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a DirLock,
    _local: MutexGuard<'a, ()>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock.file);
    }
}

/// Opens a file for read/write with `mode` bits when it is created.
pub(crate) fn create_file(path: &Path, mode: u32, truncate: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options
        .read(true)
        .write(true)
        .create(true)
        .truncate(truncate);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

fn make_dir(path: &Path, mode: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path)
}

fn check_path_len(dir: &Path, file_name: &str) -> JournalResult<()> {
    // +1 for the separator.
    if dir.as_os_str().len() + 1 + file_name.len() > MAX_PATH_LEN {
        return Err(JournalError::CreatePathLen {
            path: dir.join(file_name),
        });
    }
    Ok(())
}

fn parse_epoch(name: &str) -> Option<u32> {
    if name.len() != 8 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(name, 16).ok()
}

fn encode_name(name: &str) -> String {
    name.bytes().map(|b| format!("{b:02x}")).collect()
}

fn decode_name(hex: &str) -> Option<String> {
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn create_makes_directory_once() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("journal");

        let (_, created) = JournalDir::create(&path, 0o640, 0o750).unwrap();
        assert!(created);
        assert!(path.is_dir());

        let (_, created) = JournalDir::create(&path, 0o640, 0o750).unwrap();
        assert!(!created);
    }

    #[test]
    fn create_rejects_regular_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("plain");
        fs::write(&path, b"x").unwrap();

        let err = JournalDir::create(&path, 0o640, 0o750).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotADirectory);
    }

    #[test]
    fn open_missing_directory_fails() {
        let temp = tempdir().unwrap();
        let err = JournalDir::open(&temp.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Open);
    }

    #[test]
    fn overlong_path_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("x".repeat(MAX_PATH_LEN));
        let err = JournalDir::create(&path, 0o640, 0o750).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CreatePathLen);
    }

    #[test]
    fn paths_are_correct() {
        let temp = tempdir().unwrap();
        let (dir, _) = JournalDir::create(temp.path(), 0o640, 0o750).unwrap();

        assert_eq!(dir.segment_path(0x1f), temp.path().join("0000001f"));
        assert_eq!(dir.index_path(2), temp.path().join("00000002.idx"));
        assert_eq!(dir.meta_path(), temp.path().join("metastore"));
        assert_eq!(
            dir.checkpoint_path("ab").unwrap(),
            temp.path().join("cp.6162")
        );
        assert_eq!(
            dir.checkpoint_lock_path("ab").unwrap(),
            temp.path().join("cp.6162.lock")
        );
        assert!(dir.checkpoint_path("").is_err());
    }

    #[test]
    fn meta_round_trip() {
        let temp = tempdir().unwrap();
        let (dir, _) = JournalDir::create(temp.path(), 0o640, 0o750).unwrap();

        assert!(!dir.is_initialized());
        assert_eq!(dir.load_meta().unwrap_err().kind(), ErrorKind::MetaOpen);

        let mut meta = Metastore::from_config(&JournalConfig::default());
        meta.current_epoch = 3;
        dir.save_meta(&meta).unwrap();

        assert!(dir.is_initialized());
        assert_eq!(dir.load_meta().unwrap(), meta);
        assert!(!temp.path().join("metastore.tmp").exists());
    }

    #[test]
    fn listings_filter_foreign_files() {
        let temp = tempdir().unwrap();
        let (dir, _) = JournalDir::create(temp.path(), 0o640, 0o750).unwrap();

        for name in ["00000000", "00000002", "00000001.idx", "0000000g", "notes"] {
            fs::write(temp.path().join(name), b"abc").unwrap();
        }
        fs::write(dir.checkpoint_path("reader").unwrap(), [0u8; 8]).unwrap();
        fs::write(dir.checkpoint_lock_path("reader").unwrap(), b"").unwrap();
        fs::write(temp.path().join("cp.zz"), b"").unwrap();

        assert_eq!(dir.segment_epochs().unwrap(), vec![0, 2]);
        assert_eq!(dir.subscriber_names().unwrap(), vec!["reader".to_string()]);
        assert_eq!(dir.raw_size().unwrap(), 6);
    }

    #[test]
    fn lock_excludes_second_handle() {
        let temp = tempdir().unwrap();
        let (dir, _) = JournalDir::create(temp.path(), 0o640, 0o750).unwrap();

        let first = dir.writer_lock().unwrap();
        let second = dir.writer_lock().unwrap();

        let guard = first.try_acquire().unwrap();
        assert_eq!(second.try_acquire().unwrap_err().kind(), ErrorKind::Lock);
        drop(guard);

        let _guard = second.try_acquire().unwrap();
    }

    #[test]
    fn held_lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let (dir, _) = JournalDir::create(temp.path(), 0o640, 0o750).unwrap();
        let path = dir.checkpoint_lock_path("s").unwrap();

        let held = DirLock::open(&path, 0o640).unwrap().try_hold().unwrap();
        assert!(DirLock::open(&path, 0o640).unwrap().try_hold().is_err());
        drop(held);
        assert!(DirLock::open(&path, 0o640).unwrap().try_hold().is_ok());
    }

    #[test]
    fn name_codec() {
        assert_eq!(decode_name(&encode_name("subscriber-1")).unwrap(), "subscriber-1");
        assert!(decode_name("abc").is_none());
        assert!(decode_name("zz").is_none());
    }
}
