//! Sync cursor repository trait.

use crate::error::IndexResult;
use crate::models::CursorRow;
use async_trait::async_trait;

/// Repository for per-(pool, exchange) sync cursors.
#[async_trait]
pub trait CursorRepo: Send + Sync {
    /// Get the cursor for a pool and exchange pair.
    async fn get_cursor(&self, pool: &str, exchange: &str) -> IndexResult<Option<CursorRow>>;

    /// Upsert a cursor.
    async fn set_cursor(&self, cursor: &CursorRow) -> IndexResult<()>;
}
