use thiserror::Error;

/// Top-level error type for the Steward workspace.
///
/// Subsystem crates define their own error types for domain failures. This
/// type covers the ambient concerns shared by every crate: configuration,
/// file I/O, and (de)serialization of scripts and snapshots.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StewardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for StewardError {
    fn from(err: toml::de::Error) -> Self {
        StewardError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for StewardError {
    fn from(err: toml::ser::Error) -> Self {
        StewardError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for StewardError {
    fn from(err: serde_json::Error) -> Self {
        StewardError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Steward operations.
pub type Result<T> = std::result::Result<T, StewardError>;
