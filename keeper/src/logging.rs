//! Installs the global `tracing` subscriber once, before the supervisor
//! acquires the pidfile or starts any children — the same ordering the
//! teacher's own logging setup uses ahead of signal-handler installation.

use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unable to set the global logging subscriber: {0}")]
    TryInit(String),
}

/// `verbose`/`quiet` map to the default directive; `RUST_LOG` always wins
/// when set, so an operator can get finer-grained filtering without a
/// rebuild.
pub fn init(verbose: bool, quiet: bool) -> Result<(), LoggingError> {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else if quiet {
        LevelFilter::WARN
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .try_init()
        .map_err(|err| LoggingError::TryInit(err.to_string()))
}
