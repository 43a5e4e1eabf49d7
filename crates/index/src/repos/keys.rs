//! Master keystore repository trait.

use crate::error::IndexResult;
use crate::models::KeyRow;
use async_trait::async_trait;
use rockpool_core::KeyId;

/// Repository for per-pool master keys, keyed by generation.
#[async_trait]
pub trait KeyRepo: Send + Sync {
    /// Store a key generation. Idempotent per (pool, key id).
    async fn set_key(&self, pool: &str, key_id: KeyId, key: &[u8]) -> IndexResult<()>;

    /// Get one key generation.
    async fn get_key(&self, pool: &str, key_id: KeyId) -> IndexResult<Option<Vec<u8>>>;

    /// All key generations of a pool, oldest first.
    async fn keystore(&self, pool: &str) -> IndexResult<Vec<KeyRow>>;

    /// The newest key generation, if any.
    async fn current_key(&self, pool: &str) -> IndexResult<Option<KeyRow>>;
}
