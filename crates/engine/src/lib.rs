//! Pool engine for the rockpool replication substrate.
//!
//! A pool is a named, signed, shared feed of binary entries replicated
//! through one or more untrusted blob-storage exchanges. This crate owns
//! the lifecycle: define, create, open, send, receive, list, sync, access
//! control, housekeeping and cross-exchange replication.

pub mod access;
pub mod cache;
pub mod error;
pub mod housekeeping;
pub mod pool;
pub mod sync;
pub mod token;

pub use error::{PoolError, PoolResult};
pub use pool::Pool;
pub use token::{Token, add_pool};

use rockpool_core::PoolConfig;
use rockpool_index::{LocalIndex, PoolRepo as _};

/// Persist a pool configuration. Idempotent by pool name.
pub async fn define(index: &dyn LocalIndex, config: &PoolConfig) -> PoolResult<()> {
    config.validate()?;
    index.save_config(config).await?;
    Ok(())
}

/// Names of every pool defined in the local index.
pub async fn list_pools(index: &dyn LocalIndex) -> PoolResult<Vec<String>> {
    Ok(index.list_pools().await?)
}
