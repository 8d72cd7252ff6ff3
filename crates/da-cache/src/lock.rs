//! Exclusive advisory lock on a cache root.
//!
//! The store is never shared between processes. Whoever opens a root holds
//! this lock until the handle is closed or dropped. Contention is retried
//! until the timeout and logged once.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("cache root {path} is locked by another owner (gave up after {timeout:?})")]
    Held { path: PathBuf, timeout: Duration },

    #[error("I/O error on lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held lock on a cache root. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    lock_path: PathBuf,
    #[allow(dead_code)]
    lock_file: File,
}

impl StoreLock {
    const LOCK_FILENAME: &'static str = ".da-cache.lock";

    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Acquire the lock on an existing root directory, waiting up to
    /// `timeout` while another owner holds it.
    pub fn acquire(root: &Path, timeout: Duration) -> Result<Self, LockError> {
        let lock_path = root.join(Self::LOCK_FILENAME);
        let start = Instant::now();
        let mut warned = false;

        loop {
            match Self::try_acquire_exclusive(&lock_path) {
                Ok(lock_file) => {
                    if warned {
                        info!(
                            "Cache lock acquired after {:.1}s contention: {}",
                            start.elapsed().as_secs_f64(),
                            lock_path.display()
                        );
                    }
                    return Ok(Self { lock_path, lock_file });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned {
                        warn!("Lock contention on {}, waiting", lock_path.display());
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
                return Err(LockError::Held {
                    path: root.to_path_buf(),
                    timeout,
                });
            }

            std::thread::sleep(Self::POLL_INTERVAL);
        }
    }

    #[cfg(unix)]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
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

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
