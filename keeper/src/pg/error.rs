use std::process::ExitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PgControllerError {
    #[error("io error launching `{bin}`: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{bin}` exited with {status}: {stderr}")]
    NonZeroExit {
        bin: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("database did not become ready within {0:?}")]
    NotReady(std::time::Duration),

    #[error("database did not stop within {0:?}")]
    StopTimeout(std::time::Duration),

    #[error("could not parse control file output: {0}")]
    ControlFileParse(String),

    #[error("database client error: {0}")]
    Client(#[from] postgres::Error),
}
