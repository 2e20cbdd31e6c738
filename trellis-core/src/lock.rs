use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Name of the lock file within a database directory
pub const LOCK_FILE: &str = "lck";

/// Advisory single-writer lock on a database directory.
///
/// Holds an exclusive lock on the `lck` file for its lifetime. The lock is
/// released when the guard is dropped; the file itself stays, so every
/// opener locks the same inode.
#[derive(Debug)]
pub struct DbLock {
    /// File handle (owns the file lock)
    file: File,
    path: PathBuf,
}

impl DbLock {
    /// Acquires the lock of the database in `dir`.
    ///
    /// # Arguments
    ///
    /// * `dir` - Database directory
    /// * `retries` - Further attempts after the first one fails
    /// * `backoff` - Pause before the first retry; doubles on each retry
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or the lock is
    /// still held by another process after all retries.
    pub fn acquire(dir: &Path, retries: u32, backoff: Duration) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        let mut wait = backoff;
        let mut attempt = 0;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file, path }),
                Err(err) if attempt < retries => {
                    log::warn!(
                        "database {} is locked ({err}), retrying in {:?}",
                        dir.display(),
                        wait
                    );
                    thread::sleep(wait);
                    wait = wait.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("Database {} is already opened by another process", dir.display())
                    });
                }
            }
        }
    }
}

impl Drop for DbLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            log::warn!("failed to release lock {}: {err}", self.path.display());
        }
    }
}
