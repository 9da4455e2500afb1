//! The supervisor's pidfile (§3 "Pidfile", Invariant 5): first line is the
//! agent's own pid, second line is the log-semaphore lock's id, followed by
//! one `"<pid> <serviceName>"` line per supervised child, then one pidfile
//! path per service (used to print version strings without starting them).
//!
//! Checking "is the pid alive" is done with `kill(pid, None)` — signal 0,
//! which performs the permission/existence check without actually
//! signaling the process, the conventional POSIX way to probe liveness.

use std::io;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::{getpid, Pid};

use super::error::SupervisorError;

#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub pid: i32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ParsedPidfile {
    pub agent_pid: i32,
    pub log_semaphore_id: String,
    pub services: Vec<ServiceEntry>,
    pub service_pidfiles: Vec<PathBuf>,
}

pub struct Pidfile {
    path: PathBuf,
}

impl Pidfile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Refuses to start if an existing pid in the pidfile is still alive;
    /// otherwise a stale pidfile (and its log semaphore) is removed.
    pub fn acquire(&self) -> Result<(), SupervisorError> {
        if let Ok(existing) = self.read() {
            if pid_is_alive(existing.agent_pid) {
                return Err(SupervisorError::AlreadyRunning(existing.agent_pid));
            }
            self.remove().ok();
        }
        Ok(())
    }

    pub fn write(
        &self,
        log_semaphore_id: &str,
        services: &[ServiceEntry],
        service_pidfiles: &[PathBuf],
    ) -> Result<(), SupervisorError> {
        let mut contents = format!("{}\n{log_semaphore_id}\n", getpid());
        for entry in services {
            contents.push_str(&format!("{} {}\n", entry.pid, entry.name));
        }
        for path in service_pidfiles {
            contents.push_str(&format!("{}\n", path.display()));
        }
        std::fs::write(&self.path, contents).map_err(|source| SupervisorError::Pidfile {
            path: self.path.clone(),
            source,
        })
    }

    pub fn read(&self) -> Result<ParsedPidfile, SupervisorError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|source| {
            SupervisorError::Pidfile {
                path: self.path.clone(),
                source,
            }
        })?;
        parse(&self.path, &contents)
    }

    /// Invariant 5: an agent that cannot read its own pidfile, or whose
    /// pidfile's primary pid no longer matches its own, terminates
    /// immediately. Called once per supervision-loop tick.
    pub fn check_sentinel(&self) -> Result<(), SupervisorError> {
        let parsed = self.read()?;
        let actual = getpid().as_raw();
        if parsed.agent_pid != actual {
            return Err(SupervisorError::SentinelMismatch {
                claimed: parsed.agent_pid,
                actual,
            });
        }
        Ok(())
    }

    pub fn remove(&self) -> Result<(), SupervisorError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SupervisorError::Pidfile {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn pid_is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

fn parse(path: &Path, contents: &str) -> Result<ParsedPidfile, SupervisorError> {
    let mut lines = contents.lines();

    let agent_pid = lines
        .next()
        .and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| SupervisorError::CorruptPidfile {
            path: path.to_path_buf(),
            reason: "missing agent pid line".to_string(),
        })?;

    let log_semaphore_id = lines
        .next()
        .ok_or_else(|| SupervisorError::CorruptPidfile {
            path: path.to_path_buf(),
            reason: "missing log semaphore id line".to_string(),
        })?
        .to_string();

    let mut services = Vec::new();
    let mut service_pidfiles = Vec::new();
    for line in lines {
        match line.split_once(' ') {
            Some((pid, name)) if pid.chars().all(|c| c.is_ascii_digit()) => {
                services.push(ServiceEntry {
                    pid: pid.parse().map_err(|_| SupervisorError::CorruptPidfile {
                        path: path.to_path_buf(),
                        reason: format!("invalid service pid `{pid}`"),
                    })?,
                    name: name.to_string(),
                });
            }
            _ => service_pidfiles.push(PathBuf::from(line)),
        }
    }

    Ok(ParsedPidfile {
        agent_pid,
        log_semaphore_id,
        services,
        service_pidfiles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_succeeds_on_fresh_path() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = Pidfile::new(dir.path().join("node1.pid"));
        assert!(pidfile.acquire().is_ok());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = Pidfile::new(dir.path().join("node1.pid"));
        let services = vec![ServiceEntry {
            pid: 4242,
            name: "postgres".to_string(),
        }];
        let pg_pidfile = dir.path().join("pg.version");
        pidfile.write("12345", &services, &[pg_pidfile.clone()]).unwrap();

        let parsed = pidfile.read().unwrap();
        assert_eq!(parsed.agent_pid, nix::unistd::getpid().as_raw());
        assert_eq!(parsed.log_semaphore_id, "12345");
        assert_eq!(parsed.services[0].pid, 4242);
        assert_eq!(parsed.services[0].name, "postgres");
        assert_eq!(parsed.service_pidfiles[0], pg_pidfile);
    }

    #[test]
    fn sentinel_mismatch_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = Pidfile::new(dir.path().join("node1.pid"));
        std::fs::write(pidfile.path(), "999999\nsem\n").unwrap();
        assert!(matches!(
            pidfile.check_sentinel(),
            Err(SupervisorError::SentinelMismatch { .. })
        ));
    }

    #[test]
    fn stale_pidfile_is_removed_on_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = Pidfile::new(dir.path().join("node1.pid"));
        // pid 999999 is exceedingly unlikely to be alive in any test sandbox.
        std::fs::write(pidfile.path(), "999999\nsem\n").unwrap();
        assert!(pidfile.acquire().is_ok());
        assert!(!pidfile.path().exists());
    }
}
