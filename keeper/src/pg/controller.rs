//! The local database is a supervised child that the agent exec's directly
//! (never through a daemonizing wrapper), so the supervisor's `waitpid`
//! loop observes crashes as they happen. This module exposes the handful
//! of operations the FSM and control loop need; starting/stopping the
//! actual OS process reuses the same typestate-tracked command pattern the
//! supervisor uses for every other child (see `crate::supervisor`).

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use postgres::{Client, NoTls};
use tracing::{info, instrument, warn};

use super::control_file::{read_control_file, ControlFile};
use super::error::PgControllerError;

/// Binary names resolved once at controller construction; kept overridable
/// (rather than hardcoded) since `pg_autoctl` must run against whichever
/// PostgreSQL install is on `$PATH` inside the target container/host.
#[derive(Debug, Clone)]
pub struct PgBinaries {
    pub postgres: String,
    pub pg_controldata: String,
    pub initdb: String,
}

impl Default for PgBinaries {
    fn default() -> Self {
        Self {
            postgres: "postgres".to_string(),
            pg_controldata: "pg_controldata".to_string(),
            initdb: "initdb".to_string(),
        }
    }
}

pub struct LocalDbController {
    bins: PgBinaries,
    pgdata: PathBuf,
    port: u16,
    db_readiness: Duration,
    graceful_stop: Duration,
    child: Option<Child>,
}

impl LocalDbController {
    pub fn new(bins: PgBinaries, pgdata: PathBuf, port: u16) -> Self {
        Self {
            bins,
            pgdata,
            port,
            db_readiness: crate::config::defaults::DB_READINESS,
            graceful_stop: crate::config::defaults::GRACEFUL_STOP,
            child: None,
        }
    }

    pub fn with_db_readiness(mut self, d: Duration) -> Self {
        self.db_readiness = d;
        self
    }

    pub fn with_graceful_stop(mut self, d: Duration) -> Self {
        self.graceful_stop = d;
        self
    }

    /// Fork+exec the server, then block until the readiness probe succeeds
    /// or `db_readiness` elapses.
    #[instrument(skip(self), fields(pgdata = %self.pgdata.display(), port = self.port))]
    pub fn start(&mut self) -> Result<u32, PgControllerError> {
        if let Some(child) = &mut self.child {
            if let Ok(None) = child.try_wait() {
                return Ok(child.id());
            }
        }

        let child = Command::new(&self.bins.postgres)
            .arg("-D")
            .arg(&self.pgdata)
            .arg("-p")
            .arg(self.port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| PgControllerError::Spawn {
                bin: self.bins.postgres.clone(),
                source,
            })?;
        let pid = child.id();
        self.child = Some(child);

        self.wait_ready()?;
        info!(pid, "database server is ready");
        Ok(pid)
    }

    fn wait_ready(&self) -> Result<(), PgControllerError> {
        let deadline = Instant::now() + self.db_readiness;
        loop {
            if self.probe_connection().is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PgControllerError::NotReady(self.db_readiness));
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    fn probe_connection(&self) -> Result<Client, postgres::Error> {
        Client::connect(
            &format!(
                "host=localhost port={} user=postgres connect_timeout=1",
                self.port
            ),
            NoTls,
        )
    }

    /// Send terminate to the child and wait up to `graceful_stop`; escalate
    /// to an immediate shutdown signal if it hasn't exited by then.
    #[instrument(skip(self))]
    pub fn stop(&mut self) -> Result<(), PgControllerError> {
        let Some(pid) = self.child.as_ref().map(|c| c.id()) else {
            return Ok(());
        };

        signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).ok();

        let deadline = Instant::now() + self.graceful_stop;
        loop {
            if let Some(child) = &mut self.child {
                if matches!(child.try_wait(), Ok(Some(_))) {
                    self.child = None;
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                warn!(pid, "database did not stop gracefully, escalating");
                signal::kill(Pid::from_raw(pid as i32), Signal::SIGQUIT).ok();
                if let Some(child) = &mut self.child {
                    child.wait().ok();
                }
                self.child = None;
                return Err(PgControllerError::StopTimeout(self.graceful_stop));
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    pub fn restart(&mut self) -> Result<u32, PgControllerError> {
        self.stop()?;
        self.start()
    }

    /// True when the server accepts writes (not in recovery).
    pub fn is_primary(&self) -> Result<bool, PgControllerError> {
        Ok(!self.is_in_recovery()?)
    }

    /// Distinguished from "is running" per §4.2: a server can be up and
    /// refusing connections briefly during crash recovery, or up and
    /// replaying WAL as a standby.
    pub fn is_in_recovery(&self) -> Result<bool, PgControllerError> {
        let mut client = self.probe_connection()?;
        let row = client.query_one("SELECT pg_is_in_recovery()", &[])?;
        Ok(row.get(0))
    }

    /// Number of standbys currently streaming from this server, used by the
    /// control loop to refresh `lastSecondaryContactEpoch` (§3, Invariant 2)
    /// independently of whatever the coordinator can see.
    pub fn connected_standby_count(&self) -> Result<i64, PgControllerError> {
        let mut client = self.probe_connection()?;
        let row = client.query_one("SELECT count(*) FROM pg_stat_replication", &[])?;
        Ok(row.get(0))
    }

    pub fn read_control(&self) -> Result<ControlFile, PgControllerError> {
        read_control_file(&self.bins.pg_controldata, &self.pgdata)
    }

    pub fn is_running(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn data_directory_is_empty(&self) -> std::io::Result<bool> {
        Ok(!self.pgdata.exists() || self.pgdata.read_dir()?.next().is_none())
    }

    pub fn pgdata(&self) -> &Path {
        &self.pgdata
    }

    /// Runs `initdb` into an empty data directory. Idempotent in the sense
    /// that `initdb` itself refuses to run twice into a non-empty
    /// directory, so a retry after a crash between `data_directory_is_empty`
    /// and here simply observes "not empty" and skips ahead.
    #[instrument(skip(self))]
    pub fn initdb(&self, auth_method: &str) -> Result<(), PgControllerError> {
        let output = Command::new(&self.bins.initdb)
            .arg("-D")
            .arg(&self.pgdata)
            .arg("--auth")
            .arg(auth_method)
            .arg("--username")
            .arg("postgres")
            .output()
            .map_err(|source| PgControllerError::Spawn {
                bin: self.bins.initdb.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(PgControllerError::NonZeroExit {
                bin: self.bins.initdb.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        info!("initdb completed");
        Ok(())
    }

    /// A client connection to the running local server, for the one-time
    /// bootstrap SQL (roles, database, extensions) the FSM issues during
    /// `Init -> Single`.
    pub fn connect(&self) -> Result<Client, PgControllerError> {
        self.probe_connection().map_err(PgControllerError::from)
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_data_directory_detection() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            LocalDbController::new(PgBinaries::default(), dir.path().to_path_buf(), 5432);
        assert!(controller.data_directory_is_empty().unwrap());

        std::fs::write(dir.path().join("PG_VERSION"), "16\n").unwrap();
        assert!(!controller.data_directory_is_empty().unwrap());
    }

    #[test]
    fn missing_data_directory_counts_as_empty() {
        let controller = LocalDbController::new(
            PgBinaries::default(),
            PathBuf::from("/does/not/exist"),
            5432,
        );
        assert!(controller.data_directory_is_empty().unwrap());
    }
}
