//! Exclusive-execution locks for commands that must not run concurrently.
//!
//! [`FileLock`] holds an advisory `flock`-style lock on a file in the system
//! temp directory. The lock is tied to the open file, so it disappears when
//! the holding process exits, however it exits.

use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Capability to hold a named exclusive lock.
pub trait Lock {
    /// Try to take the lock without blocking.
    ///
    /// Returns `Ok(false)` when another holder has it.
    ///
    /// # Errors
    ///
    /// Returns an error when the lock cannot be attempted at all.
    fn acquire(&mut self) -> Result<bool>;

    /// Give the lock back. Releasing a lock that is not held is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when the lock cannot be released.
    fn release(&mut self) -> Result<()>;
}

/// File lock for ensuring single-instance execution.
#[derive(Debug)]
pub struct FileLock {
    /// The lock file handle, present while held
    file: Option<File>,
    /// Path to the lock file
    path: PathBuf,
}

impl FileLock {
    /// Creates a lock on `path`. Nothing is touched until [`Lock::acquire`].
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            file: None,
            path: path.into(),
        }
    }

    /// Creates the lock for a job name, stored as `<temp dir>/<name>.lock`.
    ///
    /// Characters other than ASCII alphanumerics, `-`, `_` and `.` are
    /// replaced with `_` so any command name maps to a plain file name.
    #[must_use]
    pub fn for_job(name: &str) -> Self {
        let file_name: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Self::new(std::env::temp_dir().join(format!("{file_name}.lock")))
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks if the lock is currently held by this instance.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.file.is_some()
    }
}

impl Lock for FileLock {
    fn acquire(&mut self) -> Result<bool> {
        if self.is_locked() {
            return Ok(true);
        }

        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| {
                Error::lock_with_source(
                    format!("Failed to open or create lock file at {}", self.path.display()),
                    e,
                )
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %self.path.display(), "Lock acquired");
                self.file = Some(file);
                Ok(true)
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                debug!(path = %self.path.display(), "Lock held by another process");
                Ok(false)
            }
            Err(e) => Err(Error::lock_with_source(
                format!("Failed to lock {}", self.path.display()),
                e,
            )),
        }
    }

    fn release(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            FileExt::unlock(&file).map_err(|e| {
                Error::lock_with_source(
                    format!("Failed to release lock on file {}", self.path.display()),
                    e,
                )
            })?;
            debug!(path = %self.path.display(), "Lock released");
        }
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.is_locked() {
            let _ = self.release();
        }
    }
}
