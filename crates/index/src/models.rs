//! Database rows mapping to the index schema.

use crate::error::{IndexError, IndexResult};
use rockpool_core::{AccessRecord, AccessState, ContentHash, EntryId, Head, KeyId};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Head row. Ids are stored as i64 bit-for-bit; the snowflake layout keeps
/// the high bit clear so the cast is lossless.
#[derive(Debug, Clone, FromRow)]
pub struct HeadRow {
    pub pool: String,
    pub id: i64,
    pub name: String,
    pub size: i64,
    pub hash: Vec<u8>,
    pub mod_time: OffsetDateTime,
    pub author_id: String,
    pub signature: Vec<u8>,
    pub meta: Vec<u8>,
    pub key_id: i64,
    pub ord: i64,
}

impl HeadRow {
    pub fn from_head(pool: &str, head: &Head) -> Self {
        Self {
            pool: pool.to_string(),
            id: head.id.as_u64() as i64,
            name: head.name.clone(),
            size: head.size,
            hash: head.hash.as_bytes().to_vec(),
            mod_time: head.mod_time,
            author_id: head.author_id.clone(),
            signature: head.signature.clone(),
            meta: head.meta.clone(),
            key_id: head.key_id.as_u64() as i64,
            ord: head.offset,
        }
    }

    pub fn into_head(self) -> IndexResult<Head> {
        let hash: [u8; 32] = self
            .hash
            .as_slice()
            .try_into()
            .map_err(|_| IndexError::Corrupt(format!("head {} has malformed hash", self.id)))?;
        Ok(Head {
            id: EntryId::from_u64(self.id as u64),
            name: self.name,
            size: self.size,
            hash: ContentHash::from_bytes(hash),
            mod_time: self.mod_time,
            author_id: self.author_id,
            signature: self.signature,
            meta: self.meta,
            key_id: KeyId::from_u64(self.key_id as u64),
            offset: self.ord,
        })
    }
}

/// Access ledger row.
#[derive(Debug, Clone, FromRow)]
pub struct AccessRow {
    pub pool: String,
    pub peer_id: String,
    pub state: String,
    pub mod_time: OffsetDateTime,
}

impl AccessRow {
    pub fn into_record(self) -> IndexResult<AccessRecord> {
        let state = AccessState::parse(&self.state)
            .map_err(|e| IndexError::Corrupt(e.to_string()))?;
        Ok(AccessRecord {
            id: self.peer_id,
            state,
            mod_time: self.mod_time,
        })
    }
}

/// Known identity row. Identities are global; pools reference them through
/// the access ledger.
#[derive(Debug, Clone, FromRow)]
pub struct IdentityRow {
    pub peer_id: String,
    pub nick: String,
    pub added_on: OffsetDateTime,
}

/// Master key row.
#[derive(Debug, Clone, FromRow)]
pub struct KeyRow {
    pub pool: String,
    pub key_id: i64,
    pub key: Vec<u8>,
}

impl KeyRow {
    pub fn key_id(&self) -> KeyId {
        KeyId::from_u64(self.key_id as u64)
    }
}

/// Per-exchange sync cursor row.
#[derive(Debug, Clone, FromRow)]
pub struct CursorRow {
    pub pool: String,
    pub exchange: String,
    pub slot: String,
    pub list_offset: i64,
    /// Modification time of the access document last imported from this
    /// exchange.
    pub access_mtime: Option<OffsetDateTime>,
}
