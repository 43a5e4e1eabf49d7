//! The capability every transport backend must provide.

use crate::error::ExchangeResult;
use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

/// Half-open byte range `[start, end)` for partial reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Metadata of one object or directory on an exchange.
#[derive(Clone, Debug)]
pub struct FileInfo {
    /// Base name, no path components.
    pub name: String,
    /// Size in bytes; zero for directories.
    pub size: u64,
    /// Last modification time, when the backend reports one.
    pub mod_time: Option<OffsetDateTime>,
    /// Whether the entry is a directory (or backend-synthesized prefix).
    pub is_dir: bool,
}

/// Blob-store capability the core consumes from each transport.
///
/// Implementations must be safe for concurrent use; the engine shares them
/// across sync, housekeeping and application I/O.
#[async_trait]
pub trait Exchanger: Send + Sync + 'static {
    /// List the entries under `path` in stable name order, skipping the
    /// first `offset` of them. `offset = 0` means the full listing.
    async fn read_dir(&self, path: &str, offset: usize) -> ExchangeResult<Vec<FileInfo>>;

    /// Read an object, optionally only a byte range of it. A range past the
    /// end of the object is truncated, not an error.
    async fn read(&self, path: &str, range: Option<ByteRange>) -> ExchangeResult<Bytes>;

    /// Create or overwrite an object atomically. Returns the size written.
    async fn write(&self, path: &str, data: Bytes) -> ExchangeResult<u64>;

    /// Stat an object. `NotFound` when it does not exist.
    async fn stat(&self, path: &str) -> ExchangeResult<FileInfo>;

    /// Delete an object, or a directory and everything under it.
    async fn delete(&self, path: &str) -> ExchangeResult<()>;

    /// Cheap liveness probe: has anything under `prefix` changed since this
    /// exchanger last asked? Must be conservative: `false` only when the
    /// prefix is definitely unchanged.
    async fn touched(&self, prefix: &str) -> bool;

    /// Stable identifier of this exchange, used as the partition key for
    /// per-exchange sync cursors.
    fn id(&self) -> &str;
}
