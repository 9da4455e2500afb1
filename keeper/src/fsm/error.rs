use thiserror::Error;

use crate::client::error::ClientError;
use crate::pg::error::PgControllerError;
use crate::roles::NodeRole;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("no transition defined from {current} to {assigned}")]
    NoSuchTransition {
        current: NodeRole,
        assigned: NodeRole,
    },

    #[error("local database operation failed: {0}")]
    Db(#[from] PgControllerError),

    #[error("database client error: {0}")]
    Client(#[from] postgres::Error),

    #[error("coordinator call failed during transition: {0}")]
    Coordinator(#[from] ClientError),

    #[error("transition precondition not met: {0}")]
    PreconditionNotMet(String),

    #[error("still waiting: {0}")]
    StillWaiting(String),
}

impl TransitionError {
    /// Whether the loop should keep retrying on the next tick (true for
    /// everything except a truly impossible transition table lookup).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransitionError::NoSuchTransition { .. })
    }
}
