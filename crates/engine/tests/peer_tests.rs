//! Two-peer scenarios: invitation, tamper detection, revocation.

mod common;

use bytes::Bytes;
use common::*;
use rockpool_core::{AccessState, PoolOptions};
use rockpool_engine::{Pool, PoolError, add_pool, define};
use rockpool_exchange::{Exchanger, MemoryExchange};

fn body_path(pool: &str, id: rockpool_core::EntryId) -> String {
    format!("{pool}/feeds/0/{:020}.body", id.as_u64())
}

#[tokio::test]
async fn test_invite_and_read_as_second_peer() {
    let exchange_id = unique_exchange("invite");

    // Host side.
    let (_dir_a, index_a) = open_index().await;
    define(index_a.as_ref(), &memory_config("team", &exchange_id)).await.unwrap();
    let (alice, _) = keychain_pair("alice");
    let pool_a = Pool::create(index_a.clone(), alice, "team", PoolOptions::default())
        .await
        .unwrap();

    let head = pool_a
        .send("hello", Bytes::from("hi"), Vec::new())
        .await
        .unwrap();

    // Admit bob and mint a token carrying the sealed master key.
    let (bob, bob_copy) = keychain_pair("bob");
    pool_a
        .set_access(&bob.peer_id().to_base64(), AccessState::Active)
        .await
        .unwrap();
    let token = pool_a.invite(Some(&bob.peer_id())).await.unwrap();

    // Invitee side: separate index, same exchange.
    let (_dir_b, index_b) = open_index().await;
    let name = add_pool(index_b.as_ref(), &bob, &token).await.unwrap();
    assert_eq!(name, "team");

    let pool_b = Pool::open(index_b.clone(), bob_copy, "team", PoolOptions::default())
        .await
        .unwrap();

    let heads = pool_b.list(0).await.unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].id, head.id);

    let body = receive_bytes(&pool_b, head.id, None).await.unwrap();
    assert_eq!(body, b"hi");

    pool_a.close().await;
    pool_b.close().await;
}

#[tokio::test]
async fn test_add_pool_rejects_invalid_tokens() {
    let (_dir, index) = open_index().await;
    let (bob, _) = keychain_pair("bob");

    for bad in ["", "###", &rockpool_core::b64::encode(b"{}")] {
        let err = add_pool(index.as_ref(), &bob, bad).await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidToken(_)), "token {bad:?}");
    }
}

#[tokio::test]
async fn test_tampered_body_fails_receive_but_cache_survives() {
    let exchange_id = unique_exchange("tamper");

    let (_dir_a, index_a) = open_index().await;
    define(index_a.as_ref(), &memory_config("team", &exchange_id)).await.unwrap();
    let (alice, _) = keychain_pair("alice");
    let pool_a = Pool::create(index_a.clone(), alice, "team", PoolOptions::default())
        .await
        .unwrap();
    let head = pool_a
        .send("doc", Bytes::from("payload"), Vec::new())
        .await
        .unwrap();

    let (bob, bob_copy) = keychain_pair("bob");
    pool_a
        .set_access(&bob.peer_id().to_base64(), AccessState::Active)
        .await
        .unwrap();
    let token = pool_a.invite(Some(&bob.peer_id())).await.unwrap();

    let (_dir_b, index_b) = open_index().await;
    add_pool(index_b.as_ref(), &bob, &token).await.unwrap();
    let pool_b = Pool::open(index_b.clone(), bob_copy, "team", PoolOptions::default())
        .await
        .unwrap();

    // Corrupt the body on the exchange underneath both peers.
    let raw = MemoryExchange::new(&exchange_id);
    let path = body_path("team", head.id);
    let mut corrupted = raw.read(&path, None).await.unwrap().to_vec();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xff;
    raw.write(&path, Bytes::from(corrupted)).await.unwrap();

    // Bob has no cached copy; the tampered body must be rejected.
    let err = receive_bytes(&pool_b, head.id, None).await.unwrap_err();
    assert!(matches!(err, PoolError::InvalidSignature(_)));

    // Alice cached the plaintext at send time and still reads it.
    let body = receive_bytes(&pool_a, head.id, None).await.unwrap();
    assert_eq!(body, b"payload");

    pool_a.close().await;
    pool_b.close().await;
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let exchange_id = unique_exchange("idem");

    let (_dir, index) = open_index().await;
    define(index.as_ref(), &memory_config("team", &exchange_id)).await.unwrap();
    let (alice, _) = keychain_pair("alice");
    let pool = Pool::create(index.clone(), alice, "team", PoolOptions::default())
        .await
        .unwrap();

    pool.send("doc", Bytes::from("x"), Vec::new()).await.unwrap();

    pool.sync().await.unwrap();
    let first = pool.list(0).await.unwrap();

    pool.sync().await.unwrap();
    let second = pool.list(0).await.unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.offset, b.offset);
    }

    pool.close().await;
}

#[tokio::test]
async fn test_revoked_peer_heads_rejected_on_ingest() {
    let exchange_id = unique_exchange("revoke");

    let (_dir_a, index_a) = open_index().await;
    define(index_a.as_ref(), &memory_config("team", &exchange_id)).await.unwrap();
    let (alice, _) = keychain_pair("alice");
    let pool_a = Pool::create(index_a.clone(), alice, "team", PoolOptions::default())
        .await
        .unwrap();

    let (bob, bob_copy) = keychain_pair("bob");
    let bob_id = bob.peer_id().to_base64();
    pool_a.set_access(&bob_id, AccessState::Active).await.unwrap();
    let token = pool_a.invite(Some(&bob.peer_id())).await.unwrap();

    let (_dir_b, index_b) = open_index().await;
    add_pool(index_b.as_ref(), &bob, &token).await.unwrap();
    let pool_b = Pool::open(index_b.clone(), bob_copy, "team", PoolOptions::default())
        .await
        .unwrap();

    // Bob writes while active; alice syncs it in.
    let accepted = pool_b
        .send("chat/1", Bytes::from("hi all"), Vec::new())
        .await
        .unwrap();
    pool_a.sync().await.unwrap();
    assert!(
        pool_a
            .list(0)
            .await
            .unwrap()
            .iter()
            .any(|h| h.id == accepted.id)
    );

    // Revoke bob, then bob writes again.
    pool_a.set_access(&bob_id, AccessState::Revoked).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let rejected = pool_b
        .send("chat/2", Bytes::from("still here?"), Vec::new())
        .await
        .unwrap();

    pool_a.sync().await.unwrap();
    let heads = pool_a.list(0).await.unwrap();
    assert!(heads.iter().any(|h| h.id == accepted.id));
    assert!(!heads.iter().any(|h| h.id == rejected.id));

    pool_a.close().await;
    pool_b.close().await;
}

#[tokio::test]
async fn test_revocation_rotates_master_key() {
    let exchange_id = unique_exchange("rotate");

    let (_dir_a, index_a) = open_index().await;
    define(index_a.as_ref(), &memory_config("team", &exchange_id)).await.unwrap();
    let (alice, _) = keychain_pair("alice");
    let pool_a = Pool::create(index_a.clone(), alice, "team", PoolOptions::default())
        .await
        .unwrap();

    let (bob, bob_copy) = keychain_pair("bob");
    let bob_id = bob.peer_id().to_base64();
    pool_a.set_access(&bob_id, AccessState::Active).await.unwrap();
    let token = pool_a.invite(Some(&bob.peer_id())).await.unwrap();

    let (_dir_b, index_b) = open_index().await;
    add_pool(index_b.as_ref(), &bob, &token).await.unwrap();
    let pool_b = Pool::open(index_b.clone(), bob_copy, "team", PoolOptions::default())
        .await
        .unwrap();

    pool_a.set_access(&bob_id, AccessState::Revoked).await.unwrap();

    // Entries written after the rotation use a key generation bob never
    // receives.
    let secret = pool_a
        .send("doc", Bytes::from("post-rotation"), Vec::new())
        .await
        .unwrap();

    pool_b.sync().await.unwrap();
    if pool_b.list(0).await.unwrap().iter().any(|h| h.id == secret.id) {
        let err = receive_bytes(&pool_b, secret.id, None).await.unwrap_err();
        assert!(matches!(err, PoolError::NotAuthorized(_)));
    }

    pool_a.close().await;
    pool_b.close().await;
}

#[tokio::test]
async fn test_receive_falls_back_to_exchange_head() {
    let exchange_id = unique_exchange("fallback");

    let (_dir_a, index_a) = open_index().await;
    define(index_a.as_ref(), &memory_config("team", &exchange_id)).await.unwrap();
    let (alice, _) = keychain_pair("alice");
    let pool_a = Pool::create(index_a.clone(), alice, "team", PoolOptions::default())
        .await
        .unwrap();

    let (bob, bob_copy) = keychain_pair("bob");
    pool_a
        .set_access(&bob.peer_id().to_base64(), AccessState::Active)
        .await
        .unwrap();
    let token = pool_a.invite(Some(&bob.peer_id())).await.unwrap();

    let (_dir_b, index_b) = open_index().await;
    add_pool(index_b.as_ref(), &bob, &token).await.unwrap();
    let pool_b = Pool::open(index_b.clone(), bob_copy, "team", PoolOptions::default())
        .await
        .unwrap();

    // A new entry bob has not synced yet is still readable by id: the
    // head is fetched from the exchange.
    let head = pool_a
        .send("late", Bytes::from("fresh"), Vec::new())
        .await
        .unwrap();
    let body = receive_bytes(&pool_b, head.id, None).await.unwrap();
    assert_eq!(body, b"fresh");

    pool_a.close().await;
    pool_b.close().await;
}
