//! The signed access document and its export/import.
//!
//! The `.access` file on an exchange carries the membership ledger, the
//! current key generation and one sealed copy of the master key per active
//! peer. Readers verify the author's signature, merge records by mod time
//! and absorb any sealed key addressed to them.

use crate::error::{PoolError, PoolResult};
use crate::pool::Pool;
use rockpool_core::{ACCESS_FILE, AccessRecord, AccessState, KeyId};
use rockpool_exchange::Exchanger;
use rockpool_identity::{Keychain, PeerId, SealedKey};
use rockpool_index::models::{CursorRow, IdentityRow};
use rockpool_index::{
    AccessRepo as _, CursorRepo as _, IdentityRepo as _, KeyRepo as _, LocalIndex,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Nickname given to identities first seen through an access document or
/// a bare peer id.
pub(crate) const INCOGNITO_NICK: &str = "incognito";

/// Wire form of the `.access` file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDocument {
    pub records: Vec<AccessRecord>,
    pub key_id: KeyId,
    pub sealed_keys: Vec<SealedKey>,
    pub author_id: String,
    #[serde(with = "rockpool_core::b64")]
    pub signature: Vec<u8>,
}

impl AccessDocument {
    /// Canonical digest the signature covers: records sorted by peer id,
    /// the key id, then sealed keys sorted by recipient.
    pub fn digest(&self) -> [u8; 32] {
        let mut records = self.records.clone();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        let mut sealed: Vec<&SealedKey> = self.sealed_keys.iter().collect();
        sealed.sort_by_key(|s| s.recipient.to_base64());

        let mut hasher = Sha256::new();
        for record in &records {
            hasher.update(record.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(record.state.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(record.mod_time.unix_timestamp_nanos().to_be_bytes());
        }
        hasher.update(self.key_id.as_u64().to_be_bytes());
        for entry in sealed {
            hasher.update(entry.recipient.to_base64().as_bytes());
            hasher.update([0u8]);
            hasher.update(&entry.ephemeral_pk);
            hasher.update(&entry.encrypted_key);
        }
        hasher.finalize().into()
    }
}

/// Digest of the sorted local ledger, for cheap churn detection.
pub(crate) fn ledger_digest(records: &[AccessRecord]) -> [u8; 32] {
    let mut sorted: Vec<&AccessRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    let mut hasher = Sha256::new();
    for record in sorted {
        hasher.update(record.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(record.state.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(record.mod_time.unix_timestamp_nanos().to_be_bytes());
    }
    hasher.finalize().into()
}

/// Pull the `.access` file from one exchange and merge it into the local
/// index. Returns whether anything new was imported. Usable before a
/// [`Pool`] exists so open can bootstrap an invitee's key.
pub(crate) async fn import_access(
    index: &dyn LocalIndex,
    keychain: &Keychain,
    pool_name: &str,
    exchanger: &dyn Exchanger,
) -> PoolResult<bool> {
    let path = format!("{pool_name}/{ACCESS_FILE}");
    let info = match exchanger.stat(&path).await {
        Ok(info) => info,
        Err(e) if e.is_not_found() => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    // Skip the download when the document is no newer than the last one
    // imported from this exchange.
    let cursor = index.get_cursor(pool_name, exchanger.id()).await?;
    if let (Some(cursor), Some(mtime)) = (&cursor, info.mod_time)
        && cursor.access_mtime.is_some_and(|seen| seen >= mtime)
    {
        return Ok(false);
    }

    let data = exchanger.read(&path, None).await?;
    let doc: AccessDocument = serde_json::from_slice(&data)
        .map_err(|e| PoolError::InvalidSignature(format!("malformed access document: {e}")))?;

    let author = PeerId::from_base64(&doc.author_id)
        .map_err(|e| PoolError::InvalidId(e.to_string()))?;
    author
        .verify(&doc.digest(), &doc.signature)
        .map_err(|_| PoolError::InvalidSignature("access document signature".to_string()))?;

    // The author must be an active writer we already trust. An empty
    // ledger is first contact: the document introduces the membership.
    let local = index.get_accesses(pool_name, false).await?;
    let self_id = keychain.peer_id().to_base64();
    let trusted = doc.author_id == self_id
        || local.is_empty()
        || local
            .iter()
            .any(|r| r.id == doc.author_id && r.state == AccessState::Active);
    if !trusted {
        return Err(PoolError::NotTrusted(doc.author_id.clone()));
    }

    let mut changed = false;
    for record in &doc.records {
        let current = index.get_access(pool_name, &record.id).await?;
        let wins = match &current {
            None => true,
            Some(current) => record.supersedes(current),
        };
        if wins {
            if index.get_identity(&record.id).await?.is_none() {
                index
                    .set_identity(&IdentityRow {
                        peer_id: record.id.clone(),
                        nick: INCOGNITO_NICK.to_string(),
                        added_on: OffsetDateTime::now_utc(),
                    })
                    .await?;
            }
            index.set_access(pool_name, record).await?;
            changed = true;
        }
    }

    // Absorb the sealed current key when it is addressed to us.
    if index.get_key(pool_name, doc.key_id).await?.is_none()
        && let Some(sealed) = doc
            .sealed_keys
            .iter()
            .find(|s| s.recipient == keychain.peer_id())
    {
        match sealed.unseal(keychain) {
            Ok(key) => {
                index.set_key(pool_name, doc.key_id, &key).await?;
                changed = true;
                debug!(pool = pool_name, key_id = %doc.key_id, "absorbed sealed master key");
            }
            Err(e) => warn!(pool = pool_name, error = %e, "cannot unseal master key"),
        }
    }

    let cursor = cursor.unwrap_or_else(|| CursorRow {
        pool: pool_name.to_string(),
        exchange: exchanger.id().to_string(),
        slot: String::new(),
        list_offset: 0,
        access_mtime: None,
    });
    index
        .set_cursor(&CursorRow {
            access_mtime: info.mod_time,
            ..cursor
        })
        .await?;

    Ok(changed)
}

impl Pool {
    /// Digest of the sorted access ledger. Downstream subsystems compare
    /// it across calls to detect membership churn cheaply.
    pub async fn access_hash(&self) -> PoolResult<[u8; 32]> {
        let records = self.index.get_accesses(&self.name, false).await?;
        Ok(ledger_digest(&records))
    }

    /// Export the signed access document to the primary exchange.
    pub async fn export_access(&self) -> PoolResult<()> {
        let _guard = self.access_lock.lock().await;
        self.export_access_inner().await
    }

    /// Export without taking the access lock; callers hold it.
    pub(crate) async fn export_access_inner(&self) -> PoolResult<()> {
        let records = self.index.get_accesses(&self.name, false).await?;
        let master = self.master.read().await.clone();

        let mut sealed_keys = Vec::new();
        for record in records.iter().filter(|r| r.state == AccessState::Active) {
            match PeerId::from_base64(&record.id) {
                Ok(peer) => sealed_keys.push(SealedKey::seal(&master.key, &peer)?),
                Err(e) => warn!(peer = %record.id, error = %e, "skipping unsealable peer"),
            }
        }

        let mut doc = AccessDocument {
            records,
            key_id: master.id,
            sealed_keys,
            author_id: self.keychain.peer_id().to_base64(),
            signature: Vec::new(),
        };
        doc.signature = self.keychain.sign(&doc.digest());

        let json = serde_json::to_vec(&doc)?;
        self.primary
            .write(&format!("{}/{ACCESS_FILE}", self.name), json.into())
            .await?;
        Ok(())
    }

    /// Merge a newer `.access` from an exchange, then adopt any newer key
    /// generation it granted us.
    pub(crate) async fn import_access_from(&self, exchanger: &dyn Exchanger) -> PoolResult<bool> {
        let changed =
            import_access(self.index.as_ref(), &self.keychain, &self.name, exchanger).await?;
        if changed {
            self.adopt_current_key().await?;
        }
        Ok(changed)
    }
}
