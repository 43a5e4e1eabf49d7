//! Pool config repository trait.

use crate::error::IndexResult;
use async_trait::async_trait;
use rockpool_core::PoolConfig;

/// Repository for persisted pool configurations.
#[async_trait]
pub trait PoolRepo: Send + Sync {
    /// Persist a config, replacing any existing one with the same name.
    async fn save_config(&self, config: &PoolConfig) -> IndexResult<()>;

    /// Load a config by pool name.
    async fn load_config(&self, name: &str) -> IndexResult<Option<PoolConfig>>;

    /// Names of every defined pool, sorted.
    async fn list_pools(&self) -> IndexResult<Vec<String>>;

    /// Remove a pool and all its local state: config, heads, keys,
    /// accesses and cursors.
    async fn delete_pool(&self, name: &str) -> IndexResult<()>;
}
