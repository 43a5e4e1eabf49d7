//! The pool aggregate: lifecycle, send/receive and access control.

use crate::access::{INCOGNITO_NICK, import_access};
use crate::cache::BodyCache;
use crate::error::{PoolError, PoolResult};
use crate::housekeeping;
use bytes::Bytes;
use rockpool_core::{
    AccessRecord, AccessState, ContentHash, EntryId, FEEDS_DIR, Head, KeyId, PoolConfig,
    PoolOptions, WRITE_SLOT,
};
use rockpool_exchange::{ByteRange, Exchanger};
use rockpool_identity::{BodyCipher, Identity, Keychain, PeerId};
use rockpool_index::models::IdentityRow;
use rockpool_index::{
    AccessRepo as _, HeadRepo as _, IdentityRepo as _, KeyRepo as _, LocalIndex, PoolRepo as _,
};
use std::sync::{Arc, Mutex as StdMutex};
use time::OffsetDateTime;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One generation of the pool's symmetric master key.
#[derive(Clone)]
pub(crate) struct MasterKey {
    pub id: KeyId,
    pub key: [u8; 32],
}

/// An open pool: a named, signed, shared feed replicated through one or
/// more exchanges.
pub struct Pool {
    pub(crate) name: String,
    pub(crate) config: PoolConfig,
    pub(crate) options: PoolOptions,
    pub(crate) keychain: Arc<Keychain>,
    pub(crate) index: Arc<dyn LocalIndex>,
    /// Primary exchange; always a member of `exchangers`.
    pub(crate) primary: Arc<dyn Exchanger>,
    pub(crate) exchangers: Vec<Arc<dyn Exchanger>>,
    pub(crate) master: RwLock<MasterKey>,
    pub(crate) cache: BodyCache,
    pub(crate) last_replica: Mutex<OffsetDateTime>,
    /// Excludes overlapping housekeeping passes on the same pool.
    pub(crate) housekeeping_lock: Mutex<()>,
    /// Serializes access export and master-key rotation.
    pub(crate) access_lock: Mutex<()>,
    pub(crate) stop_tx: watch::Sender<bool>,
    pub(crate) worker: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Pool {
    /// Materialize a defined pool for the first time: generate the master
    /// key, seed the access ledger with self and export the signed access
    /// document. Fails with `AlreadyExists` when the pool is already
    /// present on the primary exchange, unless `force_creation` is set.
    pub async fn create(
        index: Arc<dyn LocalIndex>,
        keychain: Keychain,
        name: &str,
        options: PoolOptions,
    ) -> PoolResult<Arc<Pool>> {
        let config = load_config(index.as_ref(), name).await?;
        let exchangers = connect_all(&config).await;
        let primary = exchangers.first().cloned().ok_or(PoolError::NoExchange)?;

        if !options.force_creation {
            match primary.stat(&format!("{name}/{}", rockpool_core::ACCESS_FILE)).await {
                Ok(_) => return Err(PoolError::AlreadyExists(name.to_string())),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        store_self_identity(index.as_ref(), &keychain).await?;

        let master = MasterKey {
            id: KeyId::generate(),
            key: BodyCipher::generate_key(),
        };
        index.set_key(name, master.id, &master.key).await?;
        index
            .set_access(
                name,
                &AccessRecord {
                    id: keychain.peer_id().to_base64(),
                    state: AccessState::Active,
                    mod_time: OffsetDateTime::now_utc(),
                },
            )
            .await?;

        let pool = Self::build(name, config, options, keychain, index, primary, exchangers, master);
        pool.export_access().await?;
        housekeeping::spawn(&pool);
        Ok(pool)
    }

    /// Open a previously defined pool: connect its exchanges, merge the
    /// access document, load the master key and run one sync pass.
    pub async fn open(
        index: Arc<dyn LocalIndex>,
        keychain: Keychain,
        name: &str,
        options: PoolOptions,
    ) -> PoolResult<Arc<Pool>> {
        let config = load_config(index.as_ref(), name).await?;
        let exchangers = connect_all(&config).await;
        let primary = exchangers.first().cloned().ok_or(PoolError::NoExchange)?;

        store_self_identity(index.as_ref(), &keychain).await?;

        // First contact may grant us the master key sealed inside the
        // access document; a failure here only matters if no key is known.
        if let Err(e) = import_access(index.as_ref(), &keychain, name, primary.as_ref()).await {
            warn!(pool = name, error = %e, "cannot import access document");
        }

        let key_row = index
            .current_key(name)
            .await?
            .ok_or_else(|| PoolError::NotAuthorized(format!("no master key for pool '{name}'")))?;
        let key: [u8; 32] = key_row
            .key
            .as_slice()
            .try_into()
            .map_err(|_| PoolError::NotAuthorized("malformed master key".to_string()))?;
        let master = MasterKey {
            id: key_row.key_id(),
            key,
        };

        let pool = Self::build(name, config, options, keychain, index, primary, exchangers, master);
        housekeeping::spawn(&pool);
        pool.sync().await?;
        Ok(pool)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        name: &str,
        config: PoolConfig,
        options: PoolOptions,
        keychain: Keychain,
        index: Arc<dyn LocalIndex>,
        primary: Arc<dyn Exchanger>,
        exchangers: Vec<Arc<dyn Exchanger>>,
        master: MasterKey,
    ) -> Arc<Pool> {
        let (stop_tx, _) = watch::channel(false);
        let cache = BodyCache::new(options.cache_budget());
        Arc::new(Pool {
            name: name.to_string(),
            config,
            options,
            keychain: Arc::new(keychain),
            index,
            primary,
            exchangers,
            master: RwLock::new(master),
            cache,
            last_replica: Mutex::new(OffsetDateTime::now_utc()),
            housekeeping_lock: Mutex::new(()),
            access_lock: Mutex::new(()),
            stop_tx,
            worker: StdMutex::new(None),
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The opener's public identity.
    pub fn self_identity(&self) -> Identity {
        self.keychain.identity()
    }

    /// Indexed heads with offset at or past `offset`, ascending. The
    /// authoritative application read path; call [`Pool::sync`] first to
    /// observe remote writes.
    pub async fn list(&self, offset: i64) -> PoolResult<Vec<Head>> {
        Ok(self.index.get_heads(&self.name, offset).await?)
    }

    /// Encrypt, upload and index a new entry. The body is written before
    /// the head so a failure can orphan a body (collected by housekeeping)
    /// but never a head without a body.
    pub async fn send(&self, name: &str, data: Bytes, meta: Vec<u8>) -> PoolResult<Head> {
        Head::validate_bounds(name, &meta)?;

        let id = EntryId::generate();
        let master = self.master.read().await.clone();
        let ciphertext = BodyCipher::new(&master.key).encrypt(&data)?;

        self.primary
            .write(&self.entry_path(WRITE_SLOT, id, "body"), ciphertext.into())
            .await?;

        let mut head = Head {
            id,
            name: name.to_string(),
            size: data.len() as i64,
            hash: ContentHash::compute(&data),
            mod_time: OffsetDateTime::now_utc(),
            author_id: self.keychain.peer_id().to_base64(),
            signature: Vec::new(),
            meta,
            key_id: master.id,
            offset: 0,
        };
        head.signature = self.keychain.sign(&head.signing_payload());

        let head_json = serde_json::to_vec(&head)?;
        self.primary
            .write(&self.entry_path(WRITE_SLOT, id, "head"), head_json.into())
            .await?;

        head.offset = self.index.put_head(&self.name, &head).await?;
        self.cache.insert(&self.cache_key(id), data);
        Ok(head)
    }

    /// Resolve an entry and write its plaintext (or a byte range of it) to
    /// `writer`. Serves complete cached bodies without touching the
    /// exchange; otherwise downloads, decrypts and verifies the body hash
    /// against the head before any byte reaches the writer.
    pub async fn receive<W>(
        &self,
        id: EntryId,
        range: Option<ByteRange>,
        writer: &mut W,
    ) -> PoolResult<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let head = match self.index.get_head(&self.name, id).await? {
            Some(head) => head,
            None => {
                let path = self.find_entry_path(&self.primary, id, "head").await?;
                self.read_head(self.primary.as_ref(), &path).await?
            }
        };

        let cache_key = self.cache_key(id);
        if let Some(data) = self.cache.get(&cache_key, range) {
            writer.write_all(&data).await.map_err(|e| {
                PoolError::Exchange(rockpool_exchange::ExchangeError::Io(e))
            })?;
            return Ok(());
        }

        let body_path = self.find_entry_path(&self.primary, id, "body").await?;
        let ciphertext = self.primary.read(&body_path, None).await?;

        let key = self
            .index
            .get_key(&self.name, head.key_id)
            .await?
            .ok_or_else(|| {
                PoolError::NotAuthorized(format!("unknown key generation {}", head.key_id))
            })?;
        let key: [u8; 32] = key
            .as_slice()
            .try_into()
            .map_err(|_| PoolError::NotAuthorized("malformed master key".to_string()))?;

        let plaintext = BodyCipher::new(&key)
            .decrypt(&ciphertext)
            .map_err(|_| PoolError::InvalidSignature(format!("body of entry {id} fails authentication")))?;

        if ContentHash::compute(&plaintext) != head.hash {
            return Err(PoolError::InvalidSignature(format!(
                "body of entry {id} does not match its head hash"
            )));
        }

        let data = Bytes::from(plaintext);
        self.cache.insert(&cache_key, data.clone());

        let data = match range {
            None => data,
            Some(range) => {
                let start = (range.start as usize).min(data.len());
                let end = (range.end as usize).min(data.len());
                data.slice(start..end.max(start))
            }
        };
        writer
            .write_all(&data)
            .await
            .map_err(|e| PoolError::Exchange(rockpool_exchange::ExchangeError::Io(e)))?;
        Ok(())
    }

    /// Upsert a peer's access state, materializing its identity when it is
    /// not yet known. Revocation rotates the master key so the revoked
    /// peer cannot read entries written afterwards. Re-exports the signed
    /// access document.
    pub async fn set_access(&self, peer_id: &str, state: AccessState) -> PoolResult<()> {
        PeerId::from_base64(peer_id).map_err(|e| PoolError::InvalidId(e.to_string()))?;

        let _guard = self.access_lock.lock().await;

        if self.index.get_identity(peer_id).await?.is_none() {
            self.index
                .set_identity(&IdentityRow {
                    peer_id: peer_id.to_string(),
                    nick: INCOGNITO_NICK.to_string(),
                    added_on: OffsetDateTime::now_utc(),
                })
                .await?;
        }

        self.index
            .set_access(
                &self.name,
                &AccessRecord {
                    id: peer_id.to_string(),
                    state,
                    mod_time: OffsetDateTime::now_utc(),
                },
            )
            .await?;

        if state == AccessState::Revoked {
            let rotated = MasterKey {
                id: KeyId::generate(),
                key: BodyCipher::generate_key(),
            };
            self.index
                .set_key(&self.name, rotated.id, &rotated.key)
                .await?;
            *self.master.write().await = rotated;
            debug!(pool = %self.name, peer = peer_id, "rotated master key after revocation");
        }

        self.export_access_inner().await
    }

    /// Identities known to the pool, any access state.
    pub async fn identities(&self) -> PoolResult<Vec<Identity>> {
        let rows = self.index.pool_identities(&self.name).await?;
        let mut identities = Vec::with_capacity(rows.len());
        for row in rows {
            match PeerId::from_base64(&row.peer_id) {
                Ok(id) => identities.push(Identity { id, nick: row.nick }),
                Err(e) => warn!(peer = %row.peer_id, error = %e, "skipping malformed identity"),
            }
        }
        Ok(identities)
    }

    /// Stop the housekeeping worker. An in-flight pass completes; no new
    /// pass begins.
    pub async fn close(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.worker.lock().expect("worker handle poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Remove the pool's state from every exchange and from the local
    /// index.
    pub async fn delete(&self) -> PoolResult<()> {
        self.close().await;
        for exchanger in &self.exchangers {
            match exchanger.delete(&self.name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.index.delete_pool(&self.name).await?;
        Ok(())
    }

    // ----- internals shared with sync/housekeeping/access -----

    pub(crate) fn feeds_prefix(&self) -> String {
        format!("{}/{FEEDS_DIR}", self.name)
    }

    /// Path of one entry file. Ids are zero-padded so lexicographic
    /// listings agree with numeric id order.
    pub(crate) fn entry_path(&self, slot: &str, id: EntryId, ext: &str) -> String {
        format!("{}/{FEEDS_DIR}/{slot}/{:020}.{ext}", self.name, id.as_u64())
    }

    fn cache_key(&self, id: EntryId) -> String {
        format!("{}/{id}", self.name)
    }

    /// Find the slot an entry lives in. The write slot is tried first,
    /// then every other slot present on the exchange.
    pub(crate) async fn find_entry_path(
        &self,
        exchanger: &Arc<dyn Exchanger>,
        id: EntryId,
        ext: &str,
    ) -> PoolResult<String> {
        let candidate = self.entry_path(WRITE_SLOT, id, ext);
        match exchanger.stat(&candidate).await {
            Ok(_) => return Ok(candidate),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        for slot in exchanger.read_dir(&self.feeds_prefix(), 0).await? {
            if !slot.is_dir || slot.name == WRITE_SLOT {
                continue;
            }
            let candidate = self.entry_path(&slot.name, id, ext);
            match exchanger.stat(&candidate).await {
                Ok(_) => return Ok(candidate),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Err(PoolError::EntryNotFound(id))
    }

    /// Download and parse a head, verifying the author signature.
    pub(crate) async fn read_head(
        &self,
        exchanger: &dyn Exchanger,
        path: &str,
    ) -> PoolResult<Head> {
        let data = exchanger.read(path, None).await?;
        let head: Head = serde_json::from_slice(&data)?;

        let author = PeerId::from_base64(&head.author_id)
            .map_err(|e| PoolError::InvalidId(e.to_string()))?;
        author
            .verify(&head.signing_payload(), &head.signature)
            .map_err(|_| PoolError::InvalidSignature(format!("head of entry {}", head.id)))?;
        Ok(head)
    }

    /// Gate a head on the access ledger: its author must have been active
    /// at the head's mod time.
    pub(crate) async fn check_author(&self, head: &Head) -> PoolResult<()> {
        let record = self
            .index
            .get_access(&self.name, &head.author_id)
            .await?
            .ok_or_else(|| PoolError::NotTrusted(head.author_id.clone()))?;
        match record.state {
            AccessState::Active => Ok(()),
            AccessState::Pending => Err(PoolError::NotTrusted(head.author_id.clone())),
            // Entries authored before the revocation stay valid.
            AccessState::Revoked if head.mod_time < record.mod_time => Ok(()),
            AccessState::Revoked => Err(PoolError::NotTrusted(head.author_id.clone())),
        }
    }

    /// Whether the opener is currently an active member of the pool.
    pub(crate) async fn is_self_active(&self) -> PoolResult<bool> {
        let self_id = self.keychain.peer_id().to_base64();
        Ok(self
            .index
            .get_access(&self.name, &self_id)
            .await?
            .is_some_and(|r| r.state == AccessState::Active))
    }

    /// Re-read the newest key generation from the index into the in-memory
    /// master, if it moved forward.
    pub(crate) async fn adopt_current_key(&self) -> PoolResult<()> {
        if let Some(row) = self.index.current_key(&self.name).await? {
            let mut master = self.master.write().await;
            if row.key_id() > master.id
                && let Ok(key) = <[u8; 32]>::try_from(row.key.as_slice())
            {
                *master = MasterKey {
                    id: row.key_id(),
                    key,
                };
            }
        }
        Ok(())
    }
}

async fn load_config(index: &dyn LocalIndex, name: &str) -> PoolResult<PoolConfig> {
    let config = index
        .load_config(name)
        .await?
        .ok_or_else(|| PoolError::InvalidConfig(format!("unknown pool '{name}'")))?;
    config.validate()?;
    Ok(config)
}

async fn store_self_identity(index: &dyn LocalIndex, keychain: &Keychain) -> PoolResult<()> {
    index
        .set_identity(&IdentityRow {
            peer_id: keychain.peer_id().to_base64(),
            nick: keychain.nick().to_string(),
            added_on: OffsetDateTime::now_utc(),
        })
        .await?;
    Ok(())
}

/// Connect every configured exchange, skipping the unreachable ones. The
/// first connected exchange is the primary.
async fn connect_all(config: &PoolConfig) -> Vec<Arc<dyn Exchanger>> {
    let mut exchangers = Vec::new();
    for entry in config.exchanges() {
        match rockpool_exchange::connect(entry).await {
            Ok(exchanger) => exchangers.push(exchanger),
            Err(e) => warn!(config = ?entry, error = %e, "cannot connect exchange"),
        }
    }
    exchangers
}
