//! Error types for vizreg

use thiserror::Error;

/// Result type alias using the vizreg common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration and data-model errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error in {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Suite not found: {0}")]
    SuiteNotFound(String),

    #[error("Invalid test identity: {0}")]
    InvalidIdentity(String),
}

impl Error {
    /// Whether the error stems from user-supplied configuration rather than the environment
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::ConfigParse { .. }
                | Error::InvalidConfig(_)
                | Error::SuiteNotFound(_)
                | Error::InvalidIdentity(_)
        )
    }
}
