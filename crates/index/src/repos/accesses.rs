//! Access ledger repository trait.

use crate::error::IndexResult;
use async_trait::async_trait;
use rockpool_core::AccessRecord;

/// Repository for the per-pool access ledger.
#[async_trait]
pub trait AccessRepo: Send + Sync {
    /// Upsert an access record.
    async fn set_access(&self, pool: &str, record: &AccessRecord) -> IndexResult<()>;

    /// Get the record for one peer.
    async fn get_access(&self, pool: &str, peer_id: &str) -> IndexResult<Option<AccessRecord>>;

    /// All records of a pool, sorted by peer id; optionally only active
    /// peers.
    async fn get_accesses(&self, pool: &str, only_active: bool) -> IndexResult<Vec<AccessRecord>>;
}
