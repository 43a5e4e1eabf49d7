//! Retention and cross-exchange replication tests.

mod common;

use bytes::Bytes;
use common::*;
use rockpool_core::{
    ContentHash, EntryId, ExchangeConfig, Head, PoolConfig, PoolOptions,
};
use rockpool_engine::{Pool, define};
use rockpool_exchange::{Exchanger, MemoryExchange};
use rockpool_identity::{BodyCipher, Keychain};
use rockpool_index::{HeadRepo as _, KeyRepo as _};
use time::{Duration, OffsetDateTime};

fn entry_path(pool: &str, id: EntryId, ext: &str) -> String {
    format!("{pool}/feeds/0/{:020}.{ext}", id.as_u64())
}

/// A fully signed head plus its encrypted body, as another writer would
/// have produced them.
fn craft_entry(
    keychain: &Keychain,
    key_id: rockpool_core::KeyId,
    key: &[u8; 32],
    id: EntryId,
    name: &str,
    body: &[u8],
) -> (Head, Vec<u8>) {
    let mut head = Head {
        id,
        name: name.to_string(),
        size: body.len() as i64,
        hash: ContentHash::compute(body),
        mod_time: id.timestamp(),
        author_id: keychain.peer_id().to_base64(),
        signature: Vec::new(),
        meta: Vec::new(),
        key_id,
        offset: 0,
    };
    head.signature = keychain.sign(&head.signing_payload());
    let ciphertext = BodyCipher::new(key).encrypt(body).unwrap();
    (head, ciphertext)
}

#[tokio::test]
async fn test_retention_purges_exchange_and_index() {
    let exchange_id = unique_exchange("retention");

    let (_dir, index) = open_index().await;
    define(index.as_ref(), &memory_config("team", &exchange_id)).await.unwrap();
    let (alice, alice_copy) = keychain_pair("alice");
    let options = PoolOptions {
        life_span_days: 7,
        ..Default::default()
    };
    let pool = Pool::create(index.clone(), alice, "team", options).await.unwrap();

    // A fresh entry that must survive.
    let kept = pool.send("doc/new", Bytes::from("keep"), Vec::new()).await.unwrap();

    // An entry eight days old, planted on the exchange and in the index.
    let key_row = index.current_key("team").await.unwrap().unwrap();
    let key: [u8; 32] = key_row.key.as_slice().try_into().unwrap();
    let old_id = EntryId::from_parts(OffsetDateTime::now_utc() - Duration::days(8), 1, 0);
    let (old_head, old_body) =
        craft_entry(&alice_copy, key_row.key_id(), &key, old_id, "doc/old", b"stale");

    let raw = MemoryExchange::new(&exchange_id);
    raw.write(&entry_path("team", old_id, "head"), serde_json::to_vec(&old_head).unwrap().into())
        .await
        .unwrap();
    raw.write(&entry_path("team", old_id, "body"), old_body.into()).await.unwrap();
    index.put_head("team", &old_head).await.unwrap();

    // An orphan body past the horizon is swept as well.
    let orphan_id = EntryId::from_parts(OffsetDateTime::now_utc() - Duration::days(9), 2, 0);
    raw.write(&entry_path("team", orphan_id, "body"), Bytes::from("orphan"))
        .await
        .unwrap();

    assert_eq!(pool.list(0).await.unwrap().len(), 2);

    pool.housekeeping().await.unwrap();

    let heads = pool.list(0).await.unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].id, kept.id);
    assert!(index.get_head("team", old_id).await.unwrap().is_none());

    let remaining = raw.read_dir("team/feeds/0", 0).await.unwrap();
    let names: Vec<_> = remaining.iter().map(|f| f.name.clone()).collect();
    assert_eq!(remaining.len(), 2, "only the fresh head/body remain: {names:?}");
    for file in &remaining {
        assert!(file.name.starts_with(&format!("{:020}", kept.id.as_u64())));
    }

    pool.close().await;
}

#[tokio::test]
async fn test_housekeeping_runs_on_every_exchange() {
    let primary_id = unique_exchange("hk-primary");
    let secondary_id = unique_exchange("hk-secondary");

    let (_dir, index) = open_index().await;
    let config = PoolConfig {
        name: "team".to_string(),
        public: vec![
            ExchangeConfig::Memory { id: primary_id.clone() },
            ExchangeConfig::Memory { id: secondary_id.clone() },
        ],
        private: vec![],
    };
    define(index.as_ref(), &config).await.unwrap();
    let (alice, _) = keychain_pair("alice");
    let options = PoolOptions {
        life_span_days: 7,
        ..Default::default()
    };
    let pool = Pool::create(index.clone(), alice, "team", options).await.unwrap();

    // Expired files on the secondary are deleted by the same pass.
    let old_id = EntryId::from_parts(OffsetDateTime::now_utc() - Duration::days(10), 3, 0);
    let raw_secondary = MemoryExchange::new(&secondary_id);
    raw_secondary
        .write(&entry_path("team", old_id, "head"), Bytes::from("x"))
        .await
        .unwrap();
    raw_secondary
        .write(&entry_path("team", old_id, "body"), Bytes::from("y"))
        .await
        .unwrap();

    pool.housekeeping().await.unwrap();

    assert!(raw_secondary.read_dir("team/feeds/0", 0).await.unwrap().is_empty());
    pool.close().await;
}

#[tokio::test]
async fn test_replicate_copies_entries_and_access() {
    let primary_id = unique_exchange("rep-primary");
    let secondary_id = unique_exchange("rep-secondary");

    let (_dir, index) = open_index().await;
    let config = PoolConfig {
        name: "team".to_string(),
        public: vec![
            ExchangeConfig::Memory { id: primary_id.clone() },
            ExchangeConfig::Memory { id: secondary_id.clone() },
        ],
        private: vec![],
    };
    define(index.as_ref(), &config).await.unwrap();
    let (alice, _) = keychain_pair("alice");
    let pool = Pool::create(index.clone(), alice, "team", PoolOptions::default())
        .await
        .unwrap();

    let head = pool.send("doc", Bytes::from("replicate me"), Vec::new()).await.unwrap();

    pool.replicate().await.unwrap();

    // Head and body are byte-identical on the secondary.
    let raw_primary = MemoryExchange::new(&primary_id);
    let raw_secondary = MemoryExchange::new(&secondary_id);
    for ext in ["head", "body"] {
        let path = entry_path("team", head.id, ext);
        let original = raw_primary.read(&path, None).await.unwrap();
        let replica = raw_secondary.read(&path, None).await.unwrap();
        assert_eq!(original, replica, "{ext} replica differs");
    }
    assert!(raw_secondary.stat("team/.access").await.is_ok());

    pool.close().await;
}

#[tokio::test]
async fn test_replicate_ingests_secondary_only_entries() {
    let primary_id = unique_exchange("pull-primary");
    let secondary_id = unique_exchange("pull-secondary");

    let (_dir, index) = open_index().await;
    let config = PoolConfig {
        name: "team".to_string(),
        public: vec![
            ExchangeConfig::Memory { id: primary_id.clone() },
            ExchangeConfig::Memory { id: secondary_id.clone() },
        ],
        private: vec![],
    };
    define(index.as_ref(), &config).await.unwrap();
    let (alice, alice_copy) = keychain_pair("alice");
    let pool = Pool::create(index.clone(), alice, "team", PoolOptions::default())
        .await
        .unwrap();

    // An entry that reached only the secondary exchange.
    let key_row = index.current_key("team").await.unwrap().unwrap();
    let key: [u8; 32] = key_row.key.as_slice().try_into().unwrap();
    let id = EntryId::generate();
    let (head, body) = craft_entry(&alice_copy, key_row.key_id(), &key, id, "doc/far", b"remote");

    let raw_secondary = MemoryExchange::new(&secondary_id);
    raw_secondary
        .write(&entry_path("team", id, "head"), serde_json::to_vec(&head).unwrap().into())
        .await
        .unwrap();
    raw_secondary
        .write(&entry_path("team", id, "body"), body.into())
        .await
        .unwrap();

    pool.replicate().await.unwrap();

    assert!(pool.list(0).await.unwrap().iter().any(|h| h.id == id));
    pool.close().await;
}
