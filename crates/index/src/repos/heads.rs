//! Head catalog repository trait.

use crate::error::IndexResult;
use async_trait::async_trait;
use rockpool_core::{EntryId, Head};

/// Repository for the per-pool head catalog.
#[async_trait]
pub trait HeadRepo: Send + Sync {
    /// Insert a head, assigning the next per-pool monotonic offset. A head
    /// with an id already indexed is a replica: the insert is a no-op and
    /// the existing offset is returned.
    async fn put_head(&self, pool: &str, head: &Head) -> IndexResult<i64>;

    /// Get one head by entry id.
    async fn get_head(&self, pool: &str, id: EntryId) -> IndexResult<Option<Head>>;

    /// Get heads with offset at or past `min_offset`, ordered by offset
    /// ascending.
    async fn get_heads(&self, pool: &str, min_offset: i64) -> IndexResult<Vec<Head>>;

    /// Delete every head with an entry id below the threshold. Returns the
    /// number of rows removed.
    async fn del_heads_before(&self, pool: &str, threshold: EntryId) -> IndexResult<u64>;
}
