//! Cross-process lock around the package directories.
//!
//! The lock is a small file holding the owner's process id. Its existence
//! means the lock is held.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::LockError;
use crate::runtime::{Runtime, io_error_kind};

/// File name of the lock inside the package cache directory.
pub const LOCK_FILENAME: &str = "triforceblitz.lock";

pub struct LockFile<R: Runtime> {
    runtime: Arc<R>,
    path: PathBuf,
}

impl<R: Runtime> LockFile<R> {
    pub fn new(runtime: Arc<R>, path: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the lock file. Fails with [`LockError::LockFileLocked`] if it
    /// exists and with [`LockError::LockNotAcquired`] for any other failure.
    pub fn acquire(&self) -> Result<(), LockError> {
        let mut file = self.runtime.create_new(&self.path).map_err(|e| {
            match io_error_kind(&e) {
                Some(ErrorKind::AlreadyExists) => LockError::LockFileLocked(self.path.clone()),
                _ => LockError::LockNotAcquired {
                    path: self.path.clone(),
                    source: e,
                },
            }
        })?;

        // Diagnostic only; the lock is held either way.
        if let Err(e) = write!(file, "{}", std::process::id()) {
            warn!("Could not write process id to {:?}: {}", self.path, e);
        }
        debug!("Acquired lock {:?}", self.path);
        Ok(())
    }

    /// Deletes the lock file. Fails if it does not exist.
    pub fn release(&self) -> Result<()> {
        self.runtime
            .remove_file(&self.path)
            .with_context(|| format!("Failed to release lock {:?}", self.path))?;
        debug!("Released lock {:?}", self.path);
        Ok(())
    }

    /// Acquires the lock and returns a guard that releases it when dropped.
    pub fn acquire_guard(&self) -> Result<LockGuard<'_, R>, LockError> {
        self.acquire()?;
        Ok(LockGuard {
            lock: self,
            released: false,
        })
    }

    /// Runs `body` while holding the lock. The lock is released on every
    /// exit path, including unwinding out of `body`.
    pub fn lock<T>(&self, body: impl FnOnce() -> T) -> Result<T> {
        let guard = self.acquire_guard()?;
        let value = body();
        guard.release()?;
        Ok(value)
    }

    /// Whether the lock file exists, regardless of who holds it.
    pub fn locked(&self) -> Result<bool> {
        self.runtime
            .try_exists(&self.path)
            .with_context(|| format!("Failed to inspect lock {:?}", self.path))
    }
}

/// Held lock. Dropping it deletes the lock file.
pub struct LockGuard<'a, R: Runtime> {
    lock: &'a LockFile<R>,
    released: bool,
}

impl<R: Runtime> LockGuard<'_, R> {
    /// Releases the lock, reporting a failure to delete the file.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release()
    }
}

impl<R: Runtime> Drop for LockGuard<'_, R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.lock.release() {
            warn!("{:#}", e);
        }
    }
}
