//! Transport capability and backends for rockpool exchanges.
//!
//! An exchange is an untrusted blob store a pool replicates through. The
//! core only ever talks to the [`Exchanger`] capability; concrete backends
//! register in [`connect`], keyed by the config scheme.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemExchange;
pub use backends::memory::MemoryExchange;
pub use error::{ExchangeError, ExchangeResult};
pub use traits::{ByteRange, Exchanger, FileInfo};

use rockpool_core::ExchangeConfig;
use std::sync::Arc;

/// Connect to the exchange described by a config entry.
pub async fn connect(config: &ExchangeConfig) -> ExchangeResult<Arc<dyn Exchanger>> {
    match config {
        ExchangeConfig::File { path } => {
            Ok(Arc::new(FilesystemExchange::new(path).await?))
        }
        ExchangeConfig::Memory { id } => Ok(Arc::new(MemoryExchange::new(id))),
    }
}
