//! Index store trait and the SQLite implementation.

use crate::error::{IndexError, IndexResult};
use crate::repos::{AccessRepo, CursorRepo, HeadRepo, IdentityRepo, KeyRepo, PoolRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined local index trait the engine works against.
#[async_trait]
pub trait LocalIndex:
    HeadRepo + KeyRepo + AccessRepo + IdentityRepo + CursorRepo + PoolRepo + Send + Sync
{
    /// Run schema migration.
    async fn migrate(&self) -> IndexResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> IndexResult<()>;
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pools (
    name TEXT PRIMARY KEY,
    config TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS heads (
    pool TEXT NOT NULL,
    id INTEGER NOT NULL,
    name TEXT NOT NULL,
    size INTEGER NOT NULL,
    hash BLOB NOT NULL,
    mod_time TEXT NOT NULL,
    author_id TEXT NOT NULL,
    signature BLOB NOT NULL,
    meta BLOB NOT NULL,
    key_id INTEGER NOT NULL,
    ord INTEGER NOT NULL,
    PRIMARY KEY (pool, id)
);

CREATE INDEX IF NOT EXISTS idx_heads_ord ON heads (pool, ord);

CREATE TABLE IF NOT EXISTS keys (
    pool TEXT NOT NULL,
    key_id INTEGER NOT NULL,
    key BLOB NOT NULL,
    PRIMARY KEY (pool, key_id)
);

CREATE TABLE IF NOT EXISTS accesses (
    pool TEXT NOT NULL,
    peer_id TEXT NOT NULL,
    state TEXT NOT NULL,
    mod_time TEXT NOT NULL,
    PRIMARY KEY (pool, peer_id)
);

CREATE TABLE IF NOT EXISTS identities (
    peer_id TEXT PRIMARY KEY,
    nick TEXT NOT NULL,
    added_on TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cursors (
    pool TEXT NOT NULL,
    exchange TEXT NOT NULL,
    slot TEXT NOT NULL,
    list_offset INTEGER NOT NULL,
    access_mtime TEXT,
    PRIMARY KEY (pool, exchange)
);
"#;

/// SQLite-based local index.
pub struct SqliteIndex {
    pool: Pool<Sqlite>,
}

impl SqliteIndex {
    /// Open (creating if missing) the index at `path` and migrate it.
    pub async fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IndexError::Corrupt(format!("cannot create index dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // A single connection sidesteps SQLite's writer contention; reads
        // from the engine are short and bounded.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl LocalIndex for SqliteIndex {
    async fn migrate(&self) -> IndexResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> IndexResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{AccessRow, CursorRow, HeadRow, IdentityRow, KeyRow};
    use rockpool_core::{AccessRecord, EntryId, Head, KeyId, PoolConfig};

    const HEAD_COLUMNS: &str =
        "pool, id, name, size, hash, mod_time, author_id, signature, meta, key_id, ord";

    #[async_trait]
    impl HeadRepo for SqliteIndex {
        async fn put_head(&self, pool: &str, head: &Head) -> IndexResult<i64> {
            let mut tx = self.pool.begin().await?;

            // A head already indexed under this id is a replica from
            // another exchange; keep the first offset.
            let existing: Option<(i64,)> =
                sqlx::query_as("SELECT ord FROM heads WHERE pool = ? AND id = ?")
                    .bind(pool)
                    .bind(head.id.as_u64() as i64)
                    .fetch_optional(&mut *tx)
                    .await?;
            if let Some((ord,)) = existing {
                tx.commit().await?;
                return Ok(ord);
            }

            let (next_ord,): (i64,) =
                sqlx::query_as("SELECT COALESCE(MAX(ord), 0) + 1 FROM heads WHERE pool = ?")
                    .bind(pool)
                    .fetch_one(&mut *tx)
                    .await?;

            let row = HeadRow::from_head(pool, head);
            sqlx::query(
                "INSERT INTO heads (pool, id, name, size, hash, mod_time, author_id, signature, meta, key_id, ord)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.pool)
            .bind(row.id)
            .bind(&row.name)
            .bind(row.size)
            .bind(&row.hash)
            .bind(row.mod_time)
            .bind(&row.author_id)
            .bind(&row.signature)
            .bind(&row.meta)
            .bind(row.key_id)
            .bind(next_ord)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(next_ord)
        }

        async fn get_head(&self, pool: &str, id: EntryId) -> IndexResult<Option<Head>> {
            let row = sqlx::query_as::<_, HeadRow>(&format!(
                "SELECT {HEAD_COLUMNS} FROM heads WHERE pool = ? AND id = ?"
            ))
            .bind(pool)
            .bind(id.as_u64() as i64)
            .fetch_optional(&self.pool)
            .await?;
            row.map(HeadRow::into_head).transpose()
        }

        async fn get_heads(&self, pool: &str, min_offset: i64) -> IndexResult<Vec<Head>> {
            let rows = sqlx::query_as::<_, HeadRow>(&format!(
                "SELECT {HEAD_COLUMNS} FROM heads WHERE pool = ? AND ord >= ? ORDER BY ord"
            ))
            .bind(pool)
            .bind(min_offset)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(HeadRow::into_head).collect()
        }

        async fn del_heads_before(&self, pool: &str, threshold: EntryId) -> IndexResult<u64> {
            let result = sqlx::query("DELETE FROM heads WHERE pool = ? AND id < ?")
                .bind(pool)
                .bind(threshold.as_u64() as i64)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl KeyRepo for SqliteIndex {
        async fn set_key(&self, pool: &str, key_id: KeyId, key: &[u8]) -> IndexResult<()> {
            sqlx::query("INSERT OR REPLACE INTO keys (pool, key_id, key) VALUES (?, ?, ?)")
                .bind(pool)
                .bind(key_id.as_u64() as i64)
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn get_key(&self, pool: &str, key_id: KeyId) -> IndexResult<Option<Vec<u8>>> {
            let row: Option<(Vec<u8>,)> =
                sqlx::query_as("SELECT key FROM keys WHERE pool = ? AND key_id = ?")
                    .bind(pool)
                    .bind(key_id.as_u64() as i64)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.map(|(key,)| key))
        }

        async fn keystore(&self, pool: &str) -> IndexResult<Vec<KeyRow>> {
            let rows = sqlx::query_as::<_, KeyRow>(
                "SELECT pool, key_id, key FROM keys WHERE pool = ? ORDER BY key_id",
            )
            .bind(pool)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn current_key(&self, pool: &str) -> IndexResult<Option<KeyRow>> {
            let row = sqlx::query_as::<_, KeyRow>(
                "SELECT pool, key_id, key FROM keys WHERE pool = ? ORDER BY key_id DESC LIMIT 1",
            )
            .bind(pool)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl AccessRepo for SqliteIndex {
        async fn set_access(&self, pool: &str, record: &AccessRecord) -> IndexResult<()> {
            sqlx::query(
                "INSERT INTO accesses (pool, peer_id, state, mod_time) VALUES (?, ?, ?, ?)
                 ON CONFLICT (pool, peer_id)
                 DO UPDATE SET state = excluded.state, mod_time = excluded.mod_time",
            )
            .bind(pool)
            .bind(&record.id)
            .bind(record.state.as_str())
            .bind(record.mod_time)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_access(&self, pool: &str, peer_id: &str) -> IndexResult<Option<AccessRecord>> {
            let row = sqlx::query_as::<_, AccessRow>(
                "SELECT pool, peer_id, state, mod_time FROM accesses WHERE pool = ? AND peer_id = ?",
            )
            .bind(pool)
            .bind(peer_id)
            .fetch_optional(&self.pool)
            .await?;
            row.map(AccessRow::into_record).transpose()
        }

        async fn get_accesses(
            &self,
            pool: &str,
            only_active: bool,
        ) -> IndexResult<Vec<AccessRecord>> {
            let rows = if only_active {
                sqlx::query_as::<_, AccessRow>(
                    "SELECT pool, peer_id, state, mod_time FROM accesses
                     WHERE pool = ? AND state = 'active' ORDER BY peer_id",
                )
                .bind(pool)
                .fetch_all(&self.pool)
                .await?
            } else {
                sqlx::query_as::<_, AccessRow>(
                    "SELECT pool, peer_id, state, mod_time FROM accesses
                     WHERE pool = ? ORDER BY peer_id",
                )
                .bind(pool)
                .fetch_all(&self.pool)
                .await?
            };
            rows.into_iter().map(AccessRow::into_record).collect()
        }
    }

    #[async_trait]
    impl IdentityRepo for SqliteIndex {
        async fn set_identity(&self, identity: &IdentityRow) -> IndexResult<()> {
            sqlx::query(
                "INSERT INTO identities (peer_id, nick, added_on) VALUES (?, ?, ?)
                 ON CONFLICT (peer_id) DO UPDATE SET nick = excluded.nick",
            )
            .bind(&identity.peer_id)
            .bind(&identity.nick)
            .bind(identity.added_on)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_identity(&self, peer_id: &str) -> IndexResult<Option<IdentityRow>> {
            let row = sqlx::query_as::<_, IdentityRow>(
                "SELECT peer_id, nick, added_on FROM identities WHERE peer_id = ?",
            )
            .bind(peer_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn pool_identities(&self, pool: &str) -> IndexResult<Vec<IdentityRow>> {
            let rows = sqlx::query_as::<_, IdentityRow>(
                "SELECT i.peer_id, i.nick, i.added_on FROM identities i
                 JOIN accesses a ON a.peer_id = i.peer_id
                 WHERE a.pool = ? ORDER BY i.peer_id",
            )
            .bind(pool)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl CursorRepo for SqliteIndex {
        async fn get_cursor(&self, pool: &str, exchange: &str) -> IndexResult<Option<CursorRow>> {
            let row = sqlx::query_as::<_, CursorRow>(
                "SELECT pool, exchange, slot, list_offset, access_mtime FROM cursors
                 WHERE pool = ? AND exchange = ?",
            )
            .bind(pool)
            .bind(exchange)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn set_cursor(&self, cursor: &CursorRow) -> IndexResult<()> {
            sqlx::query(
                "INSERT INTO cursors (pool, exchange, slot, list_offset, access_mtime)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (pool, exchange)
                 DO UPDATE SET slot = excluded.slot,
                               list_offset = excluded.list_offset,
                               access_mtime = excluded.access_mtime",
            )
            .bind(&cursor.pool)
            .bind(&cursor.exchange)
            .bind(&cursor.slot)
            .bind(cursor.list_offset)
            .bind(cursor.access_mtime)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl PoolRepo for SqliteIndex {
        async fn save_config(&self, config: &PoolConfig) -> IndexResult<()> {
            let json = serde_json::to_string(config)?;
            sqlx::query("INSERT OR REPLACE INTO pools (name, config) VALUES (?, ?)")
                .bind(&config.name)
                .bind(json)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn load_config(&self, name: &str) -> IndexResult<Option<PoolConfig>> {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT config FROM pools WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?;
            row.map(|(json,)| serde_json::from_str(&json).map_err(IndexError::from))
                .transpose()
        }

        async fn list_pools(&self) -> IndexResult<Vec<String>> {
            let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM pools ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.into_iter().map(|(name,)| name).collect())
        }

        async fn delete_pool(&self, name: &str) -> IndexResult<()> {
            let mut tx = self.pool.begin().await?;
            for table in ["heads", "keys", "accesses", "cursors"] {
                sqlx::query(&format!("DELETE FROM {table} WHERE pool = ?"))
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query("DELETE FROM pools WHERE name = ?")
                .bind(name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        }
    }
}
