//! Pool engine error types.

use rockpool_core::EntryId;
use thiserror::Error;

/// Errors surfaced by the pool engine.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no exchange available")]
    NoExchange,

    #[error("signature is invalid: {0}")]
    InvalidSignature(String),

    #[error("author is not a trusted peer: {0}")]
    NotTrusted(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("pool already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error(transparent)]
    Core(#[from] rockpool_core::Error),

    #[error(transparent)]
    Exchange(#[from] rockpool_exchange::ExchangeError),

    #[error(transparent)]
    Identity(#[from] rockpool_identity::IdentityError),

    #[error(transparent)]
    Index(#[from] rockpool_index::IndexError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for pool operations.
pub type PoolResult<T> = std::result::Result<T, PoolError>;
