//! Shared fixtures for engine integration tests.

use rockpool_core::{ExchangeConfig, PoolConfig};
use rockpool_identity::Keychain;
use rockpool_index::{LocalIndex, SqliteIndex};
use std::sync::Arc;
use tempfile::TempDir;

/// A fresh SQLite index in its own temp directory.
pub async fn open_index() -> (TempDir, Arc<dyn LocalIndex>) {
    let dir = tempfile::tempdir().unwrap();
    let index = SqliteIndex::open(dir.path().join("index.db")).await.unwrap();
    (dir, Arc::new(index))
}

/// Unique memory-exchange registry id so tests never share state.
pub fn unique_exchange(tag: &str) -> String {
    format!("{tag}-{}", uuid::Uuid::new_v4())
}

/// Pool config over a single shared-memory exchange.
pub fn memory_config(pool: &str, exchange_id: &str) -> PoolConfig {
    PoolConfig {
        name: pool.to_string(),
        public: vec![ExchangeConfig::Memory {
            id: exchange_id.to_string(),
        }],
        private: vec![],
    }
}

/// A keychain plus an identical copy, since pools take ownership.
pub fn keychain_pair(nick: &str) -> (Keychain, Keychain) {
    let keychain = Keychain::generate(nick);
    let copy = Keychain::from_base64(nick, &keychain.to_base64()).unwrap();
    (keychain, copy)
}

/// Receive an entry into a buffer.
pub async fn receive_bytes(
    pool: &rockpool_engine::Pool,
    id: rockpool_core::EntryId,
    range: Option<rockpool_exchange::ByteRange>,
) -> rockpool_engine::PoolResult<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    pool.receive(id, range, &mut cursor).await?;
    Ok(cursor.into_inner())
}
