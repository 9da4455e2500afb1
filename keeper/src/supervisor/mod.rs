//! The supervisor owns everything that must exist for exactly one `pg_autoctl
//! run` process at a time on a given data directory: the pidfile (§3,
//! Invariant 5), the log-serialization lock, signal handling, and the
//! graceful-then-forceful shutdown escalation (§4.1, §4.2). It does not know
//! anything about node roles or the coordinator — that's `crate::node_active`
//! — it only knows how to keep one control-loop tick running, and how to
//! stop cleanly when asked.

pub mod error;
pub mod log_lock;
pub mod pidfile;
pub mod restart;
pub mod signal;

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use self::error::SupervisorError;
use self::log_lock::LogLock;
use self::pidfile::{Pidfile, ServiceEntry};
use crate::context::Context;

/// What a single control-loop tick tells the supervisor to do next.
pub enum Tick {
    Continue,
    Stop,
}

pub struct Supervisor {
    pidfile: Pidfile,
    log_lock: LogLock,
    cancel: Context<bool>,
    tick_interval: Duration,
}

impl Supervisor {
    /// Acquires the pidfile (refusing to start if another agent already
    /// holds it) and creates the log lock. Both are released on `run`'s
    /// return, success or failure.
    pub fn new(pidfile_path: PathBuf, log_lock_path: PathBuf) -> Result<Self, SupervisorError> {
        let pidfile = Pidfile::new(pidfile_path);
        pidfile.acquire()?;
        let log_lock = LogLock::create(log_lock_path)?;
        Ok(Self {
            pidfile,
            log_lock,
            cancel: Context::new(),
            tick_interval: Duration::from_millis(100),
        })
    }

    /// A clone of the cancellation token, handed to anything that needs to
    /// observe shutdown without going through the supervisor directly (the
    /// control loop's `wait_for_state_change`, for instance).
    pub fn cancellation(&self) -> Context<bool> {
        self.cancel.clone()
    }

    pub fn log_lock(&self) -> &LogLock {
        &self.log_lock
    }

    /// Writes the pidfile, installs signal handlers, then calls `body` once
    /// per tick until it asks to stop, a shutdown signal arrives, or the
    /// cancellation token is set from elsewhere. The pidfile sentinel
    /// (Invariant 5) is re-checked every tick; a mismatch terminates
    /// immediately rather than limping on with a stale identity.
    pub fn run(
        &self,
        services: &[ServiceEntry],
        service_pidfiles: &[PathBuf],
        mut body: impl FnMut(bool) -> Result<Tick, SupervisorError>,
    ) -> Result<(), SupervisorError> {
        self.pidfile
            .write(&self.log_lock.id(), services, service_pidfiles)?;
        signal::install();

        let result = loop {
            if signal::shutdown_requested() || self.cancel.is_cancelled() {
                break self.shutdown();
            }
            self.pidfile.check_sentinel()?;

            let reload = signal::reload_requested();
            if reload {
                info!("reload requested");
                signal::clear_reload();
            }

            match body(reload) {
                Ok(Tick::Continue) => {}
                Ok(Tick::Stop) => break Ok(()),
                Err(err) => break Err(err),
            }

            std::thread::sleep(self.tick_interval);
        };

        self.pidfile.remove().ok();
        result
    }

    /// Shutdown escalation per §4.2: broadcast cancellation to everything
    /// holding a clone of the token, then give cooperating services
    /// `SHUTDOWN_ESCALATION` to exit before the caller's own child-reaping
    /// logic is expected to start sending harsher signals.
    fn shutdown(&self) -> Result<(), SupervisorError> {
        info!("shutdown requested, stopping services");
        self.cancel.cancel_all(true).ok();
        std::thread::sleep(crate::config::defaults::SHUTDOWN_ESCALATION);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_refuses_a_second_supervisor_on_the_same_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile_path = dir.path().join("node1.pid");
        let log_lock_path = dir.path().join("node1.logsem");

        let first = Supervisor::new(pidfile_path.clone(), log_lock_path.clone()).unwrap();
        first
            .pidfile
            .write("sem", &[], &[])
            .unwrap();

        let second = Supervisor::new(pidfile_path, log_lock_path);
        assert!(matches!(
            second,
            Err(SupervisorError::AlreadyRunning(pid)) if pid == nix::unistd::getpid().as_raw()
        ));
    }

    #[test]
    fn run_stops_when_body_asks_to_stop() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(
            dir.path().join("node1.pid"),
            dir.path().join("node1.logsem"),
        )
        .unwrap();

        let mut calls = 0;
        sup.run(&[], &[], |_reload| {
            calls += 1;
            Ok(if calls >= 3 { Tick::Stop } else { Tick::Continue })
        })
        .unwrap();

        assert_eq!(calls, 3);
        assert!(!sup.pidfile.path().exists());
    }
}
