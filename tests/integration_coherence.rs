//! Integration tests for cross-instance coherence
//!
//! Each test runs two engines in one process sharing a group, exercising the
//! warm-propagation, delete-propagation, pattern-delete, and clear-all
//! scenarios over a live Redis Pub/Sub plane.

mod common;

use common::test_data::User;
use common::*;
use hybrid_redis_cache::{CancellationToken, HybridCache};
use std::time::Duration;

/// A write on one instance warms the peer's local tier: the peer serves the
/// value without contacting Redis.
#[tokio::test]
async fn write_warms_peer_local_tier() {
    let (a, b) = setup_pair("warm").await;

    a.set(
        "u:1",
        &"alice".to_string(),
        Some(Duration::from_secs(30)),
        Some(Duration::from_secs(60)),
        false,
    )
    .await
    .unwrap();

    propagate().await;

    let before = b.stats();
    let cached: Option<String> = b.get("u:1").await.unwrap();
    assert_eq!(cached.as_deref(), Some("alice"));
    let after = b.stats();
    assert!(after.local_hits > before.local_hits, "peer should not touch Redis");
}

/// A delete on one instance removes the key everywhere: Redis, the deleting
/// instance, and every peer's local tier.
#[tokio::test]
async fn delete_propagates_to_peers() {
    let (a, b) = setup_pair("del").await;

    a.set("u:1", &"alice".to_string(), None, None, false)
        .await
        .unwrap();
    propagate().await;

    // Peer holds a warmed copy before the delete.
    let warmed: Option<String> = b.get("u:1").await.unwrap();
    assert!(warmed.is_some());

    a.remove("u:1", false).await.unwrap();
    propagate().await;

    assert!(!a.exists("u:1").await.unwrap());
    assert!(!b.exists("u:1").await.unwrap());
}

/// Pattern removal deletes exactly the matching keys, returns them, and
/// leaves everything else intact on both instances.
#[tokio::test]
async fn pattern_delete_removes_exactly_the_matches() {
    let (a, b) = setup_pair("pattern").await;

    for key in ["a:1", "a:2", "b:1"] {
        a.set(key, &1u8, None, None, false).await.unwrap();
    }
    propagate().await;

    let mut removed = a
        .remove_with_pattern("a:", false, &CancellationToken::new())
        .await
        .unwrap();
    removed.sort();

    // Returned keys are namespaced and exactly the a:* set.
    assert_eq!(removed.len(), 2);
    assert!(removed.iter().all(|k| k.ends_with(":a:1") || k.ends_with(":a:2")));

    propagate().await;

    let survivor_a: Option<u8> = a.get("b:1").await.unwrap();
    let survivor_b: Option<u8> = b.get("b:1").await.unwrap();
    assert_eq!(survivor_a, Some(1));
    assert_eq!(survivor_b, Some(1));

    let gone: Option<u8> = b.get("a:1").await.unwrap();
    assert_eq!(gone, None);
}

/// A cancelled pattern removal stops issuing deletes but still reports and
/// propagates what it already deleted (here: nothing).
#[tokio::test]
async fn cancelled_pattern_delete_stops_cleanly() {
    let (a, _b) = setup_pair("pattern-cancel").await;

    for i in 0..5 {
        a.set(&format!("c:{i}"), &1u8, None, None, false)
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    cancel.cancel();

    let removed = a.remove_with_pattern("c:", false, &cancel).await.unwrap();
    assert!(removed.is_empty());

    // Nothing was deleted.
    assert!(a.exists("c:0").await.unwrap());
}

/// `clear_all` flushes Redis and empties every instance's local tier within
/// one bus round-trip. Runs on database 15 to keep the flush away from
/// concurrently running tests.
#[tokio::test]
async fn clear_all_empties_redis_and_every_local_tier() {
    let group = unique_group("clear");
    let url = format!("{}/15", redis_url());
    let options = test_options(&group).with_redis_connect_string(url);

    let a = HybridCache::new(options.clone()).await.unwrap();
    let b = HybridCache::new(options).await.unwrap();

    for i in 0..5 {
        a.set(&format!("k:{i}"), &i, None, None, false).await.unwrap();
        b.set(&format!("p:{i}"), &i, None, None, false).await.unwrap();
    }
    propagate().await;
    assert!(b.local_entry_count().await > 0);

    a.clear_all().await.unwrap();
    propagate().await;

    assert_eq!(a.local_entry_count().await, 0);
    assert_eq!(b.local_entry_count().await, 0);
    let reloaded: Option<u32> = b.get("k:0").await.unwrap();
    assert_eq!(reloaded, None);
    assert!(!a.exists("p:0").await.unwrap());
}

/// `flush_local_caches` wipes every peer's local tier but leaves Redis
/// intact, so reads repopulate from the shared tier.
#[tokio::test]
async fn flush_local_caches_is_peer_visible_but_keeps_redis() {
    let (a, b) = setup_pair("flush").await;

    a.set("kept", &"v".to_string(), None, None, false)
        .await
        .unwrap();
    propagate().await;
    assert!(b.local_entry_count().await > 0);

    b.flush_local_caches().await.unwrap();
    propagate().await;

    // Both tiers dropped, including the initiator's peer.
    assert_eq!(a.local_entry_count().await, 0);
    assert_eq!(b.local_entry_count().await, 0);

    // Redis still serves the value and the read backfills locally.
    let reloaded: Option<String> = a.get("kept").await.unwrap();
    assert_eq!(reloaded.as_deref(), Some("v"));
}

/// Bulk writes warm peers entry by entry.
#[tokio::test]
async fn bulk_write_warms_peers_per_entry() {
    let (a, b) = setup_pair("bulk-warm").await;

    let entries: std::collections::HashMap<String, User> =
        (1..=3).map(|i| (format!("u:{i}"), User::new(i))).collect();
    a.set_all(&entries, None, None, false).await.unwrap();

    propagate().await;

    let before = b.stats();
    for i in 1..=3 {
        let cached: Option<User> = b.get(&format!("u:{i}")).await.unwrap();
        assert_eq!(cached, Some(User::new(i)));
    }
    assert_eq!(b.stats().local_hits - before.local_hits, 3);
}

/// Concurrent writers to the same key converge: after the dust settles both
/// instances serve the same value, with Redis as the tie-breaker.
#[tokio::test]
async fn concurrent_writers_converge_via_redis() {
    let (a, b) = setup_pair("converge").await;

    for i in 0..10u32 {
        let (a, b) = (a.clone(), b.clone());
        let wa = tokio::spawn(async move { a.set("hot", &i, None, None, false).await });
        let wb = tokio::spawn(async move { b.set("hot", &(i + 100), None, None, false).await });
        wa.await.unwrap().unwrap();
        wb.await.unwrap().unwrap();
    }

    propagate().await;

    // Force both through Redis so they agree on the tie-breaker.
    a.flush_local_caches().await.unwrap();
    propagate().await;

    let va: Option<u32> = a.get("hot").await.unwrap();
    let vb: Option<u32> = b.get("hot").await.unwrap();
    assert_eq!(va, vb);
    assert!(va.is_some());
}
