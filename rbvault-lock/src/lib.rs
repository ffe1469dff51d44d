//! Named, non-blocking, advisory mutex over an image identifier
//! (spec.md §4.1).
//!
//! Keyed by a sanitized image id under a configured lock directory.
//! Acquisition never blocks: a conflicting holder is reported as
//! [`LockError::Contended`] immediately, which every caller in this
//! workspace treats as "someone else is handling this image" and
//! silently skips. Release happens in `Drop`, so it is guaranteed on
//! every exit path from the critical section, including panics and
//! early returns.
//!
//! Implemented with `fcntl`'s non-blocking *open file description*
//! lock (`F_OFD_SETLK`) rather than the classic process-associated
//! `F_SETLK` the teacher's `pbs-tools::process_locker::ProcessLocker`
//! uses: PBS's locker only ever needs to arbitrate between genuinely
//! separate OS processes, but spec.md §9's redesign collapses the
//! producer/consumer pool into tasks inside a single process (see
//! SPEC_FULL.md §5), and classic `fcntl` locks do not conflict with
//! each other when held by the same process on two different file
//! descriptors — they would silently stop providing mutual exclusion
//! between two tasks of this binary locking the same image. OFD locks
//! are scoped to the open file description instead of the process, so
//! they still conflict correctly between concurrent tasks, while
//! continuing to work the same way across processes and admin tools
//! sharing the same lock directory, as spec.md §9 requires.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock contended for {0}")]
    Contended(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Held lock; releases on drop.
pub struct ImageLockGuard {
    key: String,
    path: PathBuf,
    file: File,
}

impl ImageLockGuard {
    /// Try to acquire the lock for `key` under `lockdir`, non-blocking.
    ///
    /// The lock file is a zero-length file named after the sanitized
    /// key; it is created if it does not exist.
    pub fn try_acquire(lockdir: &Path, key: &str) -> Result<Self, LockError> {
        std::fs::create_dir_all(lockdir)
            .with_context(|| format!("creating lock directory {}", lockdir.display()))?;

        let path = lockdir.join(key);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("opening lock file {}", path.display()))?;

        match ofd_lock(&file, libc::F_WRLCK) {
            Ok(()) => {
                log::debug!("locked {}", path.display());
                Ok(Self {
                    key: key.to_owned(),
                    path,
                    file,
                })
            }
            Err(err) if is_contention(&err) => Err(LockError::Contended(key.to_owned())),
            Err(err) => Err(LockError::Other(anyhow::anyhow!(
                "unable to lock {}: {err}",
                path.display()
            ))),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

fn is_contention(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::EAGAIN || code == libc::EACCES
    )
}

fn make_flock(l_type: i32) -> libc::flock {
    libc::flock {
        l_type: l_type as i16,
        l_whence: libc::SEEK_SET as i16,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    }
}

/// Non-blocking OFD lock/unlock. `libc`'s `fcntl` binding does not name
/// `F_OFD_SETLK` (it is Linux-specific), so we pass the raw command
/// number directly; the `flock` struct layout is identical to the
/// classic commands.
fn ofd_lock(file: &File, l_type: i32) -> io::Result<()> {
    let op = make_flock(l_type);
    let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_OFD_SETLK, &op) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl Drop for ImageLockGuard {
    fn drop(&mut self) {
        if let Err(err) = ofd_lock(&self.file, libc::F_UNLCK) {
            log::warn!("failed to release lock {}: {err}", self.path.display());
        } else {
            log::debug!("released lock {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquires_and_releases() {
        let dir = tempdir().unwrap();
        {
            let guard = ImageLockGuard::try_acquire(dir.path(), "img1").unwrap();
            assert_eq!(guard.key(), "img1");
        }
        // lock released when guard dropped; re-acquire must succeed
        let _guard2 = ImageLockGuard::try_acquire(dir.path(), "img1").unwrap();
    }

    #[test]
    fn contention_is_reported_not_blocked() {
        let dir = tempdir().unwrap();
        let _first = ImageLockGuard::try_acquire(dir.path(), "img1").unwrap();

        // A second, independently-opened file description on the same
        // path must observe contention: OFD locks conflict across
        // distinct open file descriptions even within one process.
        let err = ImageLockGuard::try_acquire(dir.path(), "img1").unwrap_err();
        assert!(matches!(err, LockError::Contended(ref k) if k == "img1"));
    }

    #[test]
    fn different_keys_do_not_conflict() {
        let dir = tempdir().unwrap();
        let _a = ImageLockGuard::try_acquire(dir.path(), "img1").unwrap();
        let _b = ImageLockGuard::try_acquire(dir.path(), "img2").unwrap();
    }
}
