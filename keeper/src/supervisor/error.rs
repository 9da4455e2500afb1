use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("io error accessing pidfile `{}`: {source}", path.display())]
    Pidfile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("another agent is already running with pid {0}")]
    AlreadyRunning(i32),

    #[error("pidfile `{}` is corrupt: {reason}", path.display())]
    CorruptPidfile { path: PathBuf, reason: String },

    #[error("child `{0}` failed to start: {1}")]
    ChildStartFailed(String, std::io::Error),

    #[error(
        "pidfile sentinel mismatch: pidfile claims pid {claimed} but we are pid {actual}"
    )]
    SentinelMismatch { claimed: i32, actual: i32 },

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),

    /// Collapses a non-recoverable error from the supervised control loop
    /// into a string at the supervisor boundary — the loop has already
    /// logged the structured error before handing this back.
    #[error("fatal error in supervised loop: {0}")]
    Fatal(String),
}
