//! Filesystem lock keeping the bulk-copy window apart from transactional
//! loads, including those of other processes.
//!
//! Transactional loaders hold the lock shared; the bulk loader holds it
//! exclusively for as long as constraints are relaxed. The OS releases the
//! flock if the process dies.

use crate::error::StoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Lock file path for a database: `<db>.lock`
pub fn lock_file_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Holds the schema lock until dropped
#[derive(Debug)]
pub struct SchemaLockGuard {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl SchemaLockGuard {
    /// Try to take the lock without waiting.
    ///
    /// Returns `Ok(None)` when a conflicting holder exists.
    pub fn try_acquire(db_path: &Path, mode: LockMode) -> Result<Option<Self>, StoreError> {
        let path = lock_file_path(db_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let attempt = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };

        match attempt {
            Ok(()) => {
                tracing::debug!("Acquired {:?} schema lock: {}", mode, path.display());
                Ok(Some(Self { file, path, mode }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                tracing::debug!("Schema lock contended: {}", path.display());
                Ok(None)
            }
            Err(e) => Err(StoreError::Lock(e)),
        }
    }

    /// Poll for the lock until `timeout` elapses
    pub fn acquire_blocking(
        db_path: &Path,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let start = Instant::now();
        loop {
            if let Some(guard) = Self::try_acquire(db_path, mode)? {
                return Ok(guard);
            }
            if start.elapsed() >= timeout {
                return Err(StoreError::LockBusy(
                    lock_file_path(db_path).display().to_string(),
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

}

impl Drop for SchemaLockGuard {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => tracing::debug!("Released {:?} schema lock: {}", self.mode, self.path.display()),
            Err(e) => {
                tracing::warn!("Failed to release schema lock {}: {}", self.path.display(), e)
            }
        }
    }
}
