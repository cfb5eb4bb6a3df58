//! Error handling for the fittrack client crate.

use std::path::PathBuf;

/// A specialized `Result` type for fittrack operations.
pub type Result<T> = std::result::Result<T, FitError>;

/// The main error type for fittrack operations.
#[derive(Debug, thiserror::Error)]
pub enum FitError {
    /// Transport-level failure (refused, reset, timeout). Retryable.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The remote end rejected our credential.
    #[error("Unauthorized: re-authentication required")]
    Unauthorized,

    /// A frame could not be decoded
    #[error("Failed to decode frame: {0}")]
    Decode(String),

    /// Reading or writing a ledger file failed
    #[error("Persistence error at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation attempted without a resolved user scope
    #[error("Scope error: {0}")]
    Scope(String),

    /// Entry or argument failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FitError {
    /// Create a new connection error
    pub fn connection_error(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a new decode error
    pub fn decode_error(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new persistence error for the given file
    pub fn persistence_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Create a new scope error
    pub fn scope_error(msg: impl Into<String>) -> Self {
        Self::Scope(msg.into())
    }

    /// Create a new validation error
    pub fn validation_error(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether a retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
