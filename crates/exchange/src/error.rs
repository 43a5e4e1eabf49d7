//! Exchange error types.

use thiserror::Error;

/// Errors from exchange operations. Everything except `NotFound` is
/// treated as transient by the engine.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ExchangeError {
    /// Whether the error definitely means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for exchange operations.
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
