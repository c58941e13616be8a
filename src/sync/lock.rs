use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{SyncError, SyncResult};

const LOCK_FILE: &str = "run.lock";

/// Cross-process guard held for the duration of one sync run.
///
/// Backed by `flock()` on `run.lock` in the state directory, so a daemon run
/// and a `sync-now` in another process never write the cache concurrently.
/// The kernel drops the lock if the holder dies.
pub struct RunLock {
    _lock: Flock<File>,
}

impl RunLock {
    /// Take the lock, or `None` if another run holds it.
    pub fn try_acquire(state_dir: &Path) -> SyncResult<Option<Self>> {
        std::fs::create_dir_all(state_dir).map_err(|e| SyncError::io(state_dir, e))?;
        let path = lock_path(state_dir);
        let file = open_lock_file(&path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(Self { _lock: lock })),
            Err((_file, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_file, errno)) => Err(SyncError::io(&path, std::io::Error::from(errno))),
        }
    }

    /// Whether some process currently holds the lock.
    pub fn is_held(state_dir: &Path) -> bool {
        let path = lock_path(state_dir);
        if !path.exists() {
            return false;
        }
        let Ok(file) = open_lock_file(&path) else {
            return false;
        };

        match Flock::lock(file, FlockArg::LockSharedNonblock) {
            Ok(_probe) => false,
            Err((_file, errno)) => errno == Errno::EWOULDBLOCK,
        }
    }
}

fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LOCK_FILE)
}

fn open_lock_file(path: &Path) -> SyncResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| SyncError::io(path, e))
}
