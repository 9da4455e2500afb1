use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("error persisting configuration: {0}")]
    Persist(#[source] fs::file::writer::WriteError),

    #[error("missing required configuration key: {0}")]
    MissingKey(String),

    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },
}
