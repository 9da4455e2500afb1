//! Node configuration: load/merge/persist of the `<name>.cfg` INI file.
//!
//! The INI format itself is treated as an external library concern — we
//! lean on the `config` crate the same way the teacher leans on `config`/
//! `serde_yaml` for its own YAML configuration, and layer a strongly typed
//! `Config` struct plus built-in defaults on top of it.

pub mod defaults;
pub mod error;
pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as RawConfig, File, FileFormat};
use fs::file::writer::FileWriter;
use fs::file::LocalFile;

use self::error::ConfigError;
use self::paths::Paths;

#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub hostname: String,
    pub pgdata: PathBuf,
    pub pgport: u16,
    pub formation: String,
    pub group: i32,
    pub monitor_uri: Option<String>,
    pub auth_method: String,
    pub ssl_mode: String,
    pub db_readiness: Duration,
    pub graceful_stop: Duration,
    pub partition_detection: Duration,
    pub rpc_per_call: Duration,
    pub rpc_init_deadline: Duration,
    pub sleep_tick: Duration,
}

impl Config {
    /// Builds a configuration from CLI-provided node identity and defaults
    /// for everything else; used by `create` before any `<name>.cfg` exists.
    pub fn from_create_args(
        name: String,
        hostname: String,
        pgdata: PathBuf,
        pgport: u16,
        formation: String,
        group: i32,
        monitor_uri: Option<String>,
    ) -> Self {
        Self {
            name,
            hostname,
            pgdata,
            pgport,
            formation,
            group,
            monitor_uri,
            auth_method: "trust".to_string(),
            ssl_mode: "prefer".to_string(),
            db_readiness: defaults::DB_READINESS,
            graceful_stop: defaults::GRACEFUL_STOP,
            partition_detection: defaults::PARTITION_DETECTION,
            rpc_per_call: defaults::RPC_PER_CALL,
            rpc_init_deadline: defaults::RPC_INIT_DEADLINE,
            sleep_tick: defaults::SLEEP_TICK,
        }
    }

    /// Loads `<name>.cfg`, falling back to built-in defaults for absent
    /// timeout keys — minor upgrades of the config schema never fail a
    /// load, only missing *required* identity keys do.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = RawConfig::builder()
            .add_source(File::new(path.to_string_lossy().as_ref(), FileFormat::Ini))
            .build()?;

        let required = |key: &str| -> Result<String, ConfigError> {
            raw.get_string(key)
                .map_err(|_| ConfigError::MissingKey(key.to_string()))
        };
        let secs = |key: &str, default: Duration| -> Duration {
            raw.get_int(key)
                .map(|v| Duration::from_secs(v.max(0) as u64))
                .unwrap_or(default)
        };

        Ok(Self {
            name: required("node.name")?,
            hostname: required("node.hostname")?,
            pgdata: PathBuf::from(required("node.pgdata")?),
            pgport: raw
                .get_int("node.pgport")
                .map_err(|_| ConfigError::MissingKey("node.pgport".to_string()))?
                as u16,
            formation: raw
                .get_string("node.formation")
                .unwrap_or_else(|_| "default".to_string()),
            group: raw.get_int("node.group").unwrap_or(0) as i32,
            monitor_uri: raw.get_string("node.monitor").ok(),
            auth_method: raw
                .get_string("node.auth")
                .unwrap_or_else(|_| "trust".to_string()),
            ssl_mode: raw
                .get_string("node.sslmode")
                .unwrap_or_else(|_| "prefer".to_string()),
            db_readiness: secs("timeouts.db_readiness", defaults::DB_READINESS),
            graceful_stop: secs("timeouts.graceful_stop", defaults::GRACEFUL_STOP),
            partition_detection: secs(
                "timeouts.partition_detection",
                defaults::PARTITION_DETECTION,
            ),
            rpc_per_call: secs("timeouts.rpc_per_call", defaults::RPC_PER_CALL),
            rpc_init_deadline: secs("timeouts.rpc_init_deadline", defaults::RPC_INIT_DEADLINE),
            sleep_tick: secs("timeouts.sleep_tick", defaults::SLEEP_TICK),
        })
    }

    /// Round-trips through the same atomic-write primitive the state store
    /// uses: a rendered INI document, written to disk via `fs::LocalFile`.
    pub fn persist(&self, path: &Path) -> Result<(), ConfigError> {
        let rendered = self.render_ini();
        LocalFile
            .write(path, rendered)
            .map_err(ConfigError::Persist)
    }

    fn render_ini(&self) -> String {
        format!(
            "[node]\n\
             name = {name}\n\
             hostname = {hostname}\n\
             pgdata = {pgdata}\n\
             pgport = {pgport}\n\
             formation = {formation}\n\
             group = {group}\n\
             monitor = {monitor}\n\
             auth = {auth}\n\
             sslmode = {sslmode}\n\
             \n\
             [timeouts]\n\
             db_readiness = {db_readiness}\n\
             graceful_stop = {graceful_stop}\n\
             partition_detection = {partition_detection}\n\
             rpc_per_call = {rpc_per_call}\n\
             rpc_init_deadline = {rpc_init_deadline}\n\
             sleep_tick = {sleep_tick}\n",
            name = self.name,
            hostname = self.hostname,
            pgdata = self.pgdata.display(),
            pgport = self.pgport,
            formation = self.formation,
            group = self.group,
            monitor = self.monitor_uri.as_deref().unwrap_or(""),
            auth = self.auth_method,
            sslmode = self.ssl_mode,
            db_readiness = self.db_readiness.as_secs(),
            graceful_stop = self.graceful_stop.as_secs(),
            partition_detection = self.partition_detection.as_secs(),
            rpc_per_call = self.rpc_per_call.as_secs(),
            rpc_init_deadline = self.rpc_init_deadline.as_secs(),
            sleep_tick = self.sleep_tick.as_secs(),
        )
    }

    pub fn paths(&self) -> Paths {
        Paths::new(self.pgdata.clone(), self.name.clone())
    }

    /// Reads or writes a single INI key without hand-editing the file
    /// (`config get`/`config set`).
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "node.name" => Some(self.name.clone()),
            "node.hostname" => Some(self.hostname.clone()),
            "node.pgdata" => Some(self.pgdata.display().to_string()),
            "node.pgport" => Some(self.pgport.to_string()),
            "node.formation" => Some(self.formation.clone()),
            "node.group" => Some(self.group.to_string()),
            "node.monitor" => self.monitor_uri.clone(),
            "node.auth" => Some(self.auth_method.clone()),
            "node.sslmode" => Some(self.ssl_mode.clone()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: String) -> Result<(), ConfigError> {
        match key {
            "node.hostname" => self.hostname = value,
            "node.formation" => self.formation = value,
            "node.monitor" => self.monitor_uri = Some(value),
            "node.auth" => self.auth_method = value,
            "node.sslmode" => self.ssl_mode = value,
            "node.pgport" => {
                self.pgport = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "expected a port number".to_string(),
                })?
            }
            "node.group" => {
                self.group = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "expected an integer".to_string(),
                })?
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    key: other.to_string(),
                    reason: "unknown or read-only key".to_string(),
                })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_cfg() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node1.cfg");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[node]\nname = node1\nhostname = host1\npgdata = /var/lib/pg/data\npgport = 5432\n"
        )
        .unwrap();
        (dir, path)
    }

    #[test]
    fn load_falls_back_to_default_timeouts() {
        let (_dir, path) = sample_cfg();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.name, "node1");
        assert_eq!(cfg.sleep_tick, defaults::SLEEP_TICK);
        assert_eq!(cfg.formation, "default");
    }

    #[test]
    fn load_fails_on_missing_required_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cfg");
        std::fs::write(&path, "[node]\nhostname = host1\n").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::MissingKey(_))
        ));
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = Config::from_create_args(
            "n".into(),
            "h".into(),
            "/tmp/pg".into(),
            5432,
            "default".into(),
            0,
            None,
        );
        assert!(cfg.set("node.bogus", "x".into()).is_err());
    }

    #[test]
    fn render_round_trips_identity_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node1.cfg");
        let cfg = Config::from_create_args(
            "node1".into(),
            "host1".into(),
            "/var/lib/pg/data".into(),
            5433,
            "default".into(),
            0,
            Some("postgres://monitor".into()),
        );
        std::fs::write(&path, cfg.render_ini()).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.name, cfg.name);
        assert_eq!(loaded.pgport, cfg.pgport);
        assert_eq!(loaded.monitor_uri, cfg.monitor_uri);
    }
}
