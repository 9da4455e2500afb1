//! Top-level error type and the exit code taxonomy described in the CLI
//! contract. Every module below has its own narrow `thiserror` enum; this
//! one only exists at the CLI boundary to translate those into a process
//! exit code, matching the rule that only CLI entry points translate
//! errors into `std::process::exit`.

use thiserror::Error;

use crate::client::error::ClientError;
use crate::config::error::ConfigError;
use crate::fsm::error::TransitionError;
use crate::init::InitError;
use crate::pg::error::PgControllerError;
use crate::state::error::StateError;
use crate::supervisor::error::SupervisorError;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("bad arguments: {0}")]
    BadArgs(String),

    #[error(transparent)]
    BadConfig(#[from] ConfigError),

    #[error(transparent)]
    BadState(#[from] StateError),

    #[error(transparent)]
    Coordinator(#[from] ClientError),

    #[error(transparent)]
    DbControl(#[from] PgControllerError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("node was dropped")]
    Dropped,

    #[error("agent asked to quit")]
    Quit,
}

/// Fixed exit code taxonomy from the CLI contract: every kind of failure
/// maps to a distinct, stable code so operators and external supervisors
/// can script around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Ok = 0,
    BadArgs = 1,
    BadConfig = 2,
    BadState = 3,
    CoordinatorError = 4,
    DbControlError = 5,
    DbClientError = 6,
    InternalError = 7,
    Quit = 8,
    Dropped = 9,
}

impl From<&KeeperError> for ExitCode {
    fn from(err: &KeeperError) -> Self {
        match err {
            KeeperError::BadArgs(_) => ExitCode::BadArgs,
            KeeperError::BadConfig(_) => ExitCode::BadConfig,
            KeeperError::BadState(_) => ExitCode::BadState,
            KeeperError::Coordinator(_) => ExitCode::CoordinatorError,
            KeeperError::DbControl(_) => ExitCode::DbControlError,
            KeeperError::Transition(_) => ExitCode::DbControlError,
            KeeperError::Init(_) => ExitCode::BadState,
            KeeperError::Supervisor(SupervisorError::SentinelMismatch { .. }) => ExitCode::Quit,
            KeeperError::Supervisor(_) => ExitCode::InternalError,
            KeeperError::Internal(_) => ExitCode::InternalError,
            KeeperError::Dropped => ExitCode::Dropped,
            KeeperError::Quit => ExitCode::Quit,
        }
    }
}

impl From<KeeperError> for std::process::ExitCode {
    fn from(err: KeeperError) -> Self {
        std::process::ExitCode::from(ExitCode::from(&err) as u8)
    }
}
