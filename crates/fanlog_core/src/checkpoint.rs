//! Durable per-subscriber checkpoints.
//!
//! Each subscriber owns one file `cp.<hex name>` holding its checkpoint as
//! an encoded [`LogId`]. Files are replaced atomically, so a crash leaves
//! either the old or the new checkpoint.

use crate::dir::{DirLock, JournalDir};
use crate::error::{JournalError, JournalResult};
use crate::types::LogId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reads and writes subscriber checkpoints.
///
/// Registration, removal and checkpoint updates are serialized across
/// processes by `meta.lock`.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: Arc<JournalDir>,
    meta_lock: DirLock,
}

impl CheckpointStore {
    /// Creates a checkpoint store over `dir`.
    ///
    /// # Errors
    ///
    /// Returns `Lock` if the meta lock file cannot be opened.
    pub fn new(dir: Arc<JournalDir>) -> JournalResult<Self> {
        let meta_lock = dir.meta_lock()?;
        Ok(Self { dir, meta_lock })
    }

    /// Returns the lock serializing subscriber changes.
    #[must_use]
    pub fn meta_lock(&self) -> &DirLock {
        &self.meta_lock
    }

    /// Returns the checkpoint of `subscriber`.
    ///
    /// # Errors
    ///
    /// - `InvalidSubscriber` if it is not registered
    /// - `CheckpointFailed` if the record cannot be read or is malformed
    pub fn get(&self, subscriber: &str) -> JournalResult<LogId> {
        let path = self.dir.checkpoint_path(subscriber)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(JournalError::invalid_subscriber(subscriber))
            }
            Err(source) => return Err(failed(subscriber, source)),
        };
        LogId::decode(&data).map_err(|e| {
            failed(
                subscriber,
                io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
            )
        })
    }

    /// Durably moves the checkpoint of `subscriber` to `id`.
    ///
    /// # Errors
    ///
    /// - `InvalidSubscriber` if it is not registered
    /// - `CheckpointFailed` if the record cannot be written
    pub fn set(&self, subscriber: &str, id: LogId) -> JournalResult<()> {
        let path = self.dir.checkpoint_path(subscriber)?;
        let _guard = self.meta_lock.acquire()?;
        if !path.exists() {
            return Err(JournalError::invalid_subscriber(subscriber));
        }
        self.write(subscriber, &path, id)?;
        debug!(subscriber, %id, "checkpoint advanced");
        Ok(())
    }

    /// Registers `subscriber` with the checkpoint produced by `start`.
    ///
    /// `start` runs under the meta lock, so the starting position is
    /// computed atomically with the registration.
    ///
    /// # Errors
    ///
    /// Returns `SubscriberExists` if it is already registered.
    pub fn register(
        &self,
        subscriber: &str,
        start: impl FnOnce() -> JournalResult<LogId>,
    ) -> JournalResult<LogId> {
        let path = self.dir.checkpoint_path(subscriber)?;
        let _guard = self.meta_lock.acquire()?;
        if path.exists() {
            return Err(JournalError::SubscriberExists {
                name: subscriber.to_string(),
            });
        }
        let id = start()?;
        self.write(subscriber, &path, id)?;
        info!(subscriber, %id, "subscriber registered");
        Ok(id)
    }

    /// Removes `subscriber` and its checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSubscriber` if it is not registered.
    pub fn unregister(&self, subscriber: &str) -> JournalResult<()> {
        let path = self.dir.checkpoint_path(subscriber)?;
        let lock_path = self.dir.checkpoint_lock_path(subscriber)?;
        let _guard = self.meta_lock.acquire()?;

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(JournalError::invalid_subscriber(subscriber))
            }
            Err(source) => return Err(failed(subscriber, source)),
        }
        // The reader lock file goes too, unless a reader still holds it.
        if let Ok(held) = DirLock::open(&lock_path, self.dir.file_mode()).and_then(DirLock::try_hold)
        {
            if let Err(error) = fs::remove_file(held.path()) {
                warn!(subscriber, %error, "failed to remove reader lock file");
            }
        }
        self.dir
            .sync_directory()
            .map_err(|source| failed(subscriber, source))?;

        info!(subscriber, "subscriber removed");
        Ok(())
    }

    /// Takes the reader lock `cp.<hex>.lock` of `subscriber` and keeps it
    /// until the returned handle drops.
    ///
    /// Runs under the meta lock, so it cannot interleave with
    /// [`CheckpointStore::unregister`] removing the lock file.
    ///
    /// # Errors
    ///
    /// - `InvalidSubscriber` if it is not registered
    /// - `Lock` if another reader holds the lock
    pub fn hold_reader(&self, subscriber: &str) -> JournalResult<DirLock> {
        let path = self.dir.checkpoint_path(subscriber)?;
        let lock_path = self.dir.checkpoint_lock_path(subscriber)?;
        let _guard = self.meta_lock.acquire()?;
        if !path.exists() {
            return Err(JournalError::invalid_subscriber(subscriber));
        }
        DirLock::open(&lock_path, self.dir.file_mode())?.try_hold()
    }

    /// Lists registered subscribers, sorted by name.
    pub fn list(&self) -> JournalResult<Vec<String>> {
        self.dir.subscriber_names()
    }

    /// Returns every subscriber with its checkpoint.
    ///
    /// Subscribers removed while the listing runs are skipped.
    pub fn all(&self) -> JournalResult<Vec<(String, LogId)>> {
        let mut out = Vec::new();
        for name in self.list()? {
            match self.get(&name) {
                Ok(id) => out.push((name, id)),
                Err(JournalError::InvalidSubscriber { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    fn write(&self, subscriber: &str, path: &Path, id: LogId) -> JournalResult<()> {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        self.dir
            .write_atomic(&PathBuf::from(temp), path, &id.encode())
            .map_err(|source| failed(subscriber, source))
    }
}

fn failed(subscriber: &str, source: io::Error) -> JournalError {
    JournalError::CheckpointFailed {
        name: subscriber.to_string(),
        source,
    }
}
