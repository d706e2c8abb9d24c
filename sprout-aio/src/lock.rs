// sprout-aio/src/lock.rs
//! Advisory per-package locks serializing installs across tasks and processes.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sprout_common::error::{Result, SproutError};
use tracing::{debug, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Holds an exclusive `flock` on a lock file until dropped.
///
/// Each acquisition opens its own file descriptor, so two guards in the same
/// process exclude each other just like two processes do.
#[derive(Debug)]
pub struct PackageLock {
    file: File,
    path: PathBuf,
}

impl PackageLock {
    /// Takes the lock if it is free, `Ok(None)` if someone else holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            crate::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        if try_lock_exclusive(&file)? {
            debug!("Acquired lock {}", path.display());
            Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            }))
        } else {
            Ok(None)
        }
    }

    /// Waits until the lock is free. The wait is a polling loop on the
    /// runtime, so dropping the future abandons it without side effects.
    pub async fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_with_interval(path, DEFAULT_POLL_INTERVAL).await
    }

    pub async fn acquire_with_interval(path: &Path, poll: Duration) -> Result<Self> {
        let mut announced = false;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if !announced {
                debug!("Waiting for lock {}", path.display());
                announced = true;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        if let Err(e) = unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released lock {}", self.path.display());
        }
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and valid for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(SproutError::from(err))
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: as above.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> Result<bool> {
    Err(SproutError::Generic(
        "Package locks are not supported on this platform".to_string(),
    ))
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> std::io::Result<()> {
    Ok(())
}
