use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to coordinator: {0}")]
    Connect(#[source] postgres::Error),

    #[error("coordinator call `{call}` failed: {source}")]
    Rpc {
        call: &'static str,
        #[source]
        source: postgres::Error,
    },

    #[error("coordinator rejected registration: {0}")]
    Rejected(String),

    #[error("node `{name}`@`{hostname}` not found and --force not given")]
    NotFound { name: String, hostname: String },

    #[error("unknown role tag returned by coordinator: {0}")]
    UnknownRole(#[from] crate::roles::UnknownRole),

    #[error("overall RPC deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),

    #[error("notification channel closed unexpectedly")]
    NotificationChannelClosed,
}

impl ClientError {
    /// Distinguishes "transient network" (retry) from "protocol error"
    /// (fail immediately), per §4.3's retry policy.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Connect(_) => true,
            ClientError::Rpc { source, .. } => {
                source.is_closed() || source.as_db_error().is_none()
            }
            ClientError::DeadlineExceeded(_) => true,
            ClientError::Rejected(_)
            | ClientError::NotFound { .. }
            | ClientError::UnknownRole(_)
            | ClientError::NotificationChannelClosed => false,
        }
    }
}
