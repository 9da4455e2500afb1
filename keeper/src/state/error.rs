use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error accessing `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state file `{}` is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error(
        "state file `{}` is version {found} but this binary only understands major \
         version {expected}; re-registration is required",
        path.display()
    )]
    VersionMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("no state file at `{}`", .0.display())]
    NotFound(PathBuf),

    #[error("no init-progress file at `{}`", .0.display())]
    NoInitInProgress(PathBuf),
}
