//! Filesystem helpers for environment-scoped state
//!
//! Every write in keel goes through [`write_atomic`]: content is written to a
//! temp file in the destination directory, synced, and renamed into place, so
//! a concurrent reader sees either the old file or the new one.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::retry::{jittered, RetryConfig};
use crate::Error;

/// Mode for files holding secret material (owner read/write)
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Mode for directories holding secret material (owner only)
pub const PRIVATE_DIR_MODE: u32 = 0o700;

/// Locks older than this are assumed to belong to a crashed process
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// SHA-256 of `bytes`, hex encoded
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Atomically replace `path` with `contents`.
///
/// When `mode` is given the temp file gets those permissions before the
/// rename, so the final file is never visible with wider access.
pub fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<(), Error> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".keel-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| Error::write(path, e))?;

    if let Some(mode) = mode {
        set_mode(tmp.path(), mode).map_err(|e| Error::write(path, e))?;
    }

    tmp.write_all(contents).map_err(|e| Error::write(path, e))?;
    tmp.as_file().sync_all().map_err(|e| Error::write(path, e))?;
    tmp.persist(path).map_err(|e| Error::write(path, e.error))?;
    Ok(())
}

/// Create `dir` (and parents) restricted to the owner
pub fn ensure_private_dir(dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir).map_err(|e| Error::write(dir, e))?;
    set_mode(dir, PRIVATE_DIR_MODE).map_err(|e| Error::write(dir, e))
}

/// Remove a file, treating "already absent" as success.
///
/// Returns whether a file was actually removed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool, Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::remove(path, e)),
    }
}

/// Remove a directory tree, treating "already absent" as success
pub fn remove_dir_if_exists(path: &Path) -> Result<bool, Error> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::remove(path, e)),
    }
}

/// Read a file, returning `None` when it does not exist
pub fn read_if_exists(path: &Path) -> Result<Option<String>, Error> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::read(path, e)),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Advisory lock backed by an exclusively-created file.
///
/// Held for the lifetime of the value; dropping it removes the lock file.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock at `path`, waiting up to `timeout`.
    ///
    /// Contention is retried with jittered backoff. A lock file older than
    /// [`STALE_LOCK_AGE`] is removed and acquisition retried; breaking is
    /// serialized through a `<lock>.break` file and re-checks staleness, so a
    /// lock re-created by another waiter is never removed.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
        }

        let backoff = RetryConfig {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let lock = Self {
                        path: path.to_path_buf(),
                    };
                    writeln!(file, "{}", std::process::id()).map_err(|e| Error::write(path, e))?;
                    debug!(lock = %path.display(), "acquired lock");
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(path) && break_stale_lock(path)? {
                        continue;
                    }
                    if start.elapsed() >= timeout {
                        return Err(Error::LockTimeout {
                            path: path.to_path_buf(),
                        });
                    }
                    std::thread::sleep(jittered(backoff.delay_after(attempt)));
                }
                Err(e) => return Err(Error::write(path, e)),
            }
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(lock = %self.path.display(), error = %e, "failed to release lock");
            }
        }
    }
}

/// Remove the lock at `path` if it is still stale.
///
/// Only the holder of `<lock>.break` may remove it. Returns false when
/// another waiter is breaking it or it was re-acquired in the meantime.
fn break_stale_lock(path: &Path) -> Result<bool, Error> {
    let mut guard = path.as_os_str().to_owned();
    guard.push(".break");
    let guard = PathBuf::from(guard);

    match OpenOptions::new().write(true).create_new(true).open(&guard) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            if is_stale(&guard) {
                remove_file_if_exists(&guard)?;
            }
            return Ok(false);
        }
        Err(e) => return Err(Error::write(&guard, e)),
    }

    let broken = if is_stale(path) {
        warn!(lock = %path.display(), "breaking stale lock");
        remove_file_if_exists(path)
    } else {
        Ok(false)
    };
    remove_file_if_exists(&guard)?;
    broken
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}
