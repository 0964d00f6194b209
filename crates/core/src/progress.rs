//! Durable sync progress: the watermark file and its advisory lock.
//!
//! ```text
//! <state>        # decimal crash id, the highest one already forwarded
//! <state>.lock   # advisory lock held for the whole sync run
//! <state>.tmp    # transient, renamed over <state> on store
//! ```
//!
//! The watermark can only be loaded or stored through a [`ProgressLock`], so
//! every read-modify-write cycle is serialized against other processes using
//! the same state file. Only other recap-sentry instances honor the lock.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::errors::{LockError, StateError};

/// Location of the watermark file and its lock.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the watermark file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the companion lock file (`<state>.lock`).
    pub fn lock_path(&self) -> PathBuf {
        with_suffix(&self.path, ".lock")
    }

    /// Acquire the advisory lock without blocking the async executor.
    ///
    /// Waits for as long as another run holds the lock; there is no timeout.
    pub async fn lock(&self) -> Result<ProgressLock, LockError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.lock_blocking())
            .await
            .map_err(|e| LockError::Interrupted(e.to_string()))?
    }

    /// Acquire the advisory lock, blocking the current thread.
    pub fn lock_blocking(&self) -> Result<ProgressLock, LockError> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LockError::Open {
                path: lock_path.clone(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| LockError::Open {
                path: lock_path.clone(),
                source,
            })?;

        debug!(path = %lock_path.display(), "waiting for progress lock");
        file.lock_exclusive().map_err(|source| LockError::Acquire {
            path: lock_path.clone(),
            source,
        })?;
        info!(path = %lock_path.display(), "acquired progress lock");

        Ok(ProgressLock {
            path: self.path.clone(),
            lock_path,
            file,
        })
    }

    /// Read the watermark without taking the lock.
    ///
    /// Only for display; a concurrent run may be about to replace it.
    pub fn peek(&self) -> Result<u64, StateError> {
        read_watermark(&self.path)
    }
}

/// Exclusive hold on a state file. Released on drop.
#[derive(Debug)]
pub struct ProgressLock {
    path: PathBuf,
    lock_path: PathBuf,
    file: File,
}

impl ProgressLock {
    /// Load the watermark; a missing file means no prior sync (0).
    pub fn load(&self) -> Result<u64, StateError> {
        let watermark = read_watermark(&self.path)?;
        debug!(watermark, path = %self.path.display(), "loaded watermark");
        Ok(watermark)
    }

    /// Replace the watermark file atomically (write temp, fsync, rename).
    pub fn store(&self, watermark: u64) -> Result<(), StateError> {
        let io_err = |source: std::io::Error| StateError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let temp_path = with_suffix(&self.path, ".tmp");
        let mut file = File::create(&temp_path).map_err(io_err)?;
        file.write_all(watermark.to_string().as_bytes())
            .map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(io_err)?;
        sync_parent_dir(&self.path);

        info!(watermark, path = %self.path.display(), "stored watermark");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProgressLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well; unlock explicitly
        // so the release is visible in the logs.
        match FileExt::unlock(&self.file) {
            Ok(()) => debug!(path = %self.lock_path.display(), "released progress lock"),
            Err(e) => warn!(path = %self.lock_path.display(), error = %e, "failed to unlock"),
        }
    }
}

fn read_watermark(path: &Path) -> Result<u64, StateError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    contents
        .trim()
        .parse::<u64>()
        .map_err(|_| StateError::Corrupt {
            path: path.to_path_buf(),
            contents,
        })
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
        warn!(dir = %parent.display(), error = %e, "failed to fsync state directory");
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
