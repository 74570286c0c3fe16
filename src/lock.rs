//! Advisory lock on the manifest
//!
//! Two publish runs for the same component would race on `update.json`.
//! The publisher holds `<manifest>.lock` for the whole run:
//! - `flock` on unix, exclusive file creation elsewhere
//! - bounded wait with a contention warning
//! - released on drop

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Errors from lock operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(
        "timed out after {timeout:?} waiting for lock {path}; \
         if no other publish is running, a crashed run left it behind: delete {path}"
    )]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("I/O error on lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held lock on a manifest file
#[derive(Debug)]
pub struct ManifestLock {
    lock_path: PathBuf,
    #[allow(dead_code)]
    lock_file: File,
}

impl ManifestLock {
    /// Lock file path for a manifest: the manifest path with `.lock` appended
    pub fn lock_path_for(manifest_path: &Path) -> PathBuf {
        let mut name = OsString::from(manifest_path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquire the lock for `manifest_path`, waiting up to `timeout`.
    ///
    /// Creates the manifest's parent directory if needed.
    pub fn acquire(manifest_path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let lock_path = Self::lock_path_for(manifest_path);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| LockError::Io {
                    path: lock_path.clone(),
                    source,
                })?;
            }
        }

        let start = Instant::now();
        let poll_interval = Duration::from_millis(50);
        let mut warned = false;

        loop {
            match try_acquire_exclusive(&lock_path) {
                Ok(file) => {
                    if warned {
                        tracing::info!(
                            path = %lock_path.display(),
                            waited_secs = start.elapsed().as_secs_f64(),
                            "manifest lock acquired after contention"
                        );
                    }
                    return Ok(Self {
                        lock_path,
                        lock_file: file,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > Duration::from_millis(500) {
                        tracing::warn!(
                            path = %lock_path.display(),
                            "another publish holds the manifest lock, waiting"
                        );
                        warned = true;
                    }
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: lock_path,
                        source,
                    })
                }
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: lock_path,
                    timeout,
                });
            }

            std::thread::sleep(poll_interval);
        }
    }

    /// Get the lock file path
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

#[cfg(unix)]
fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(lock_path)?;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

    if result == 0 {
        Ok(file)
    } else {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        } else {
            Err(err)
        }
    }
}

#[cfg(not(unix))]
fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
    match OpenOptions::new().write(true).create_new(true).open(lock_path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        }
        Err(e) => Err(e),
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        // create_new locking needs the file gone before the next run
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}
