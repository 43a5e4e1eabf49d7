//! Identity and crypto error types.

use thiserror::Error;

/// Errors from identity handling and the crypto layer.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("sealed key is not addressed to this peer")]
    NotAddressed,
}

/// Result type for identity operations.
pub type IdentityResult<T> = std::result::Result<T, IdentityError>;
