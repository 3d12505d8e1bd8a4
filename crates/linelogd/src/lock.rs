//! Singleton guard built on an advisory `flock`.
//!
//! The lock file is opened (created if missing) and locked with
//! `LOCK_EX | LOCK_NB`, so a second instance fails immediately instead of
//! queueing. The holder's PID is written into the file for `status`/`stop`.
//!
//! Correctness rests on the kernel dropping the lock when the holder exits:
//! a file left behind by a killed daemon is just a file, and the next start
//! locks it normally.
//!
//! The lock belongs to the open file description, so it survives the
//! fork performed by detachment as long as the child keeps the descriptor.
//!
//! Releasing unlinks the path while still locked. A contender that opened
//! the old inode may still lock it afterwards, so `acquire` only accepts a
//! lock on the inode the path currently names and retries otherwise.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process;

use tracing::{debug, warn};

/// Permissions for a freshly created lock file.
const LOCK_FILE_MODE: u32 = 0o644;

/// Attempts before giving up on a lock file that keeps being replaced.
const MAX_LOCK_ATTEMPTS: usize = 8;

/// Exclusive ownership of the singleton lock.
///
/// Released by [`LockFile::release`] or on drop, whichever comes first.
#[derive(Debug)]
pub struct LockFile {
    /// Open, locked handle; `None` once released
    file: Option<File>,

    /// Path of the lock file
    path: PathBuf,
}

/// Result of probing a lock file without keeping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// Nobody holds the lock (the file may or may not exist)
    Free,

    /// Another open file description holds the lock
    Held { pid: Option<u32> },
}

impl LockFile {
    /// Opens the lock file and takes the exclusive lock without blocking.
    ///
    /// # Errors
    ///
    /// - `LockError::AlreadyRunning` when another instance holds the lock
    /// - `LockError::Io` when the file or its directory cannot be opened
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| LockError::Io {
                    action: "create lock directory",
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        for attempt in 1..=MAX_LOCK_ATTEMPTS {
            match try_lock_path(&path)? {
                Attempt::Locked(file) => {
                    let lock = Self {
                        file: Some(file),
                        path,
                    };
                    lock.record_pid();
                    debug!(path = %lock.path.display(), "Singleton lock acquired");
                    return Ok(lock);
                }
                Attempt::Held => {
                    let pid = read_pid(&path);
                    return Err(LockError::AlreadyRunning { path, pid });
                }
                Attempt::Stale => {
                    debug!(path = %path.display(), attempt, "Lock file replaced, retrying");
                }
            }
        }

        Err(LockError::Io {
            action: "lock",
            path,
            source: io::Error::new(io::ErrorKind::Other, "lock file kept being replaced"),
        })
    }

    /// Rewrites the lock file with the current PID.
    ///
    /// Best-effort: the lock stays valid even if the write fails. Called again
    /// after detaching, since the PID changes.
    pub fn record_pid(&self) {
        let Some(file) = &self.file else {
            return;
        };
        if let Err(e) = write_pid(file) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to record PID in lock file"
            );
        }
    }

    /// Returns the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true until the lock has been released.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Removes the lock file, then unlocks and closes it. A second call is a
    /// no-op.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove lock file"
            ),
        }

        // SAFETY: the descriptor belongs to `file`, which is alive for the
        // duration of the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if result != 0 {
            warn!(
                path = %self.path.display(),
                error = %io::Error::last_os_error(),
                "Failed to unlock lock file"
            );
        }
        drop(file);
        debug!(path = %self.path.display(), "Singleton lock released");
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.release();
    }
}

/// Outcome of one open-and-lock attempt.
enum Attempt {
    /// Locked the file the path currently names
    Locked(File),

    /// Someone else holds the lock
    Held,

    /// Locked an inode that is no longer at the path
    Stale,
}

fn try_lock_path(path: &Path) -> Result<Attempt, LockError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(LOCK_FILE_MODE)
        .open(path)
        .map_err(io_error("open lock file", path))?;

    if !try_flock_exclusive(&file).map_err(io_error("lock", path))? {
        return Ok(Attempt::Held);
    }

    if names_same_file(&file, path).map_err(io_error("inspect lock file", path))? {
        Ok(Attempt::Locked(file))
    } else {
        Ok(Attempt::Stale)
    }
}

fn io_error<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> LockError + 'a {
    move |source| LockError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// Returns true if `path` still names the inode behind `file`.
fn names_same_file(file: &File, path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Reports whether the lock at `path` is currently held, without keeping it.
pub fn probe(path: &Path) -> Result<LockStatus, LockError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LockStatus::Free),
        Err(source) => {
            return Err(LockError::Io {
                action: "open lock file",
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let locked = try_flock_exclusive(&file).map_err(|source| LockError::Io {
        action: "lock",
        path: path.to_path_buf(),
        source,
    })?;

    if locked {
        // Closing the descriptor drops the probe lock.
        drop(file);
        Ok(LockStatus::Free)
    } else {
        Ok(LockStatus::Held {
            pid: read_pid(path),
        })
    }
}

/// Reads the PID recorded in a lock file, if any.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Returns `Ok(false)` when the lock is held by someone else.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    // SAFETY: the descriptor comes from a live `File`; `LOCK_EX | LOCK_NB`
    // is a valid operation.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(err)
}

fn write_pid(mut file: &File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", process::id())?;
    file.sync_data()
}

/// Errors that can occur while taking the singleton lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Another instance is already running (lock held on {})", .path.display())]
    AlreadyRunning { path: PathBuf, pid: Option<u32> },

    #[error("Failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_records_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");

        let lock = LockFile::acquire(&path).unwrap();
        assert!(lock.is_held());
        assert_eq!(read_pid(&path), Some(process::id()));
    }

    #[test]
    fn test_second_acquire_reports_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");

        let _first = LockFile::acquire(&path).unwrap();
        match LockFile::acquire(&path) {
            Err(LockError::AlreadyRunning { pid, .. }) => {
                assert_eq!(pid, Some(process::id()));
            }
            other => panic!("Expected AlreadyRunning, got {other:?}"),
        }

        // The failed attempt must not disturb the holder's file.
        assert!(path.exists());
        assert_eq!(read_pid(&path), Some(process::id()));
    }

    #[test]
    fn test_release_is_idempotent_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");

        let mut lock = LockFile::acquire(&path).unwrap();
        lock.release();
        assert!(!lock.is_held());
        assert!(!path.exists());

        lock.release();
        assert!(!path.exists());

        // Free again for the next instance.
        let _again = LockFile::acquire(&path).unwrap();
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");

        {
            let _lock = LockFile::acquire(&path).unwrap();
            assert!(path.exists());
        }

        assert!(!path.exists());
        assert!(LockFile::acquire(&path).is_ok());
    }

    #[test]
    fn test_stale_file_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");
        fs::write(&path, "999999\n").unwrap();

        let lock = LockFile::acquire(&path).unwrap();
        assert_eq!(read_pid(lock.path()), Some(process::id()));
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("lock").join("daemon.lock");

        let _lock = LockFile::acquire(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");

        assert_eq!(probe(&path).unwrap(), LockStatus::Free);

        let mut lock = LockFile::acquire(&path).unwrap();
        assert_eq!(
            probe(&path).unwrap(),
            LockStatus::Held {
                pid: Some(process::id())
            }
        );

        // Probing must not steal or keep the lock.
        assert!(matches!(
            LockFile::acquire(&path),
            Err(LockError::AlreadyRunning { .. })
        ));

        lock.release();
        assert_eq!(probe(&path).unwrap(), LockStatus::Free);
    }

    #[test]
    fn test_lock_on_replaced_inode_is_not_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");

        let mut first = LockFile::acquire(&path).unwrap();

        // A contender opens the file before the holder lets go...
        let contender = File::open(&path).unwrap();
        first.release();

        // ...and can then lock the orphaned inode.
        assert!(try_flock_exclusive(&contender).unwrap());
        assert!(!names_same_file(&contender, &path).unwrap());

        // The next instance gets the path; the contender's lock counts for
        // nothing and exactly one holder remains.
        let second = LockFile::acquire(&path).unwrap();
        assert!(second.is_held());
        assert!(matches!(
            LockFile::acquire(&path),
            Err(LockError::AlreadyRunning { .. })
        ));
        assert!(matches!(try_lock_path(&path).unwrap(), Attempt::Held));
    }

    #[test]
    fn test_unopenable_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file").unwrap();

        let err = LockFile::acquire(blocker.join("daemon.lock")).unwrap_err();
        assert!(matches!(err, LockError::Io { .. }));
    }
}
