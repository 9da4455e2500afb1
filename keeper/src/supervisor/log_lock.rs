//! The "named semaphore" that serializes log writes across the supervisor
//! and every child process (§3 "Pidfile", §5 "Log semaphore"). We implement
//! it with an advisory `flock` on a small lock file rather than a POSIX
//! `sem_open` semaphore: both give every writer a single system-wide mutex
//! keyed by a path, but `flock` needs nothing beyond what's already in the
//! dependency tree (`nix`), and cleans itself up the same way a stale
//! semaphore would — the stale-pidfile path removes the lock file.
//!
//! The lock file's path doubles as the "log-semaphore id" stored in the
//! pidfile, so a later stale-pidfile cleanup can find and remove it.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};

use super::error::SupervisorError;

pub struct LogLock {
    path: PathBuf,
    file: File,
}

impl LogLock {
    pub fn create(path: PathBuf) -> Result<Self, SupervisorError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| SupervisorError::Pidfile {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, file })
    }

    /// Acquires the lock for the duration of one log line write, blocking
    /// until available, so subprocess output interleaves line-by-line
    /// rather than character-by-character.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> T) -> Result<T, SupervisorError> {
        flock(self.file.as_raw_fd(), FlockArg::LockExclusive)?;
        let result = f();
        flock(self.file.as_raw_fd(), FlockArg::Unlock)?;
        Ok(result)
    }

    /// The id recorded in the pidfile's second line.
    pub fn id(&self) -> String {
        self.path.display().to_string()
    }

    pub fn remove(path: &Path) {
        std::fs::remove_file(path).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_lock_runs_the_closure() {
        let dir = tempfile::tempdir().unwrap();
        let lock = LogLock::create(dir.path().join("node1.logsem")).unwrap();
        let ran = lock.with_lock(|| 42).unwrap();
        assert_eq!(ran, 42);
    }
}
