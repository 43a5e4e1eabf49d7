//! Known-identity repository trait.

use crate::error::IndexResult;
use crate::models::IdentityRow;
use async_trait::async_trait;

/// Repository for locally known identities. Identities are global; pools
/// reference them through access records.
#[async_trait]
pub trait IdentityRepo: Send + Sync {
    /// Upsert an identity.
    async fn set_identity(&self, identity: &IdentityRow) -> IndexResult<()>;

    /// Get an identity by peer id.
    async fn get_identity(&self, peer_id: &str) -> IndexResult<Option<IdentityRow>>;

    /// All identities referenced by a pool's access ledger, any state.
    async fn pool_identities(&self, pool: &str) -> IndexResult<Vec<IdentityRow>>;
}
