//! TTL and capacity boundaries observed through the `Cache` facade.
//!
//! These run on a paused tokio clock so expiry is exact and instant.

#![allow(clippy::expect_used, clippy::panic)]

use std::time::Duration;

use bytes::Bytes;
use forge_cache::{Cache, CacheBackend, CacheConfig, MemoryCache};
use tokio::time::advance;

fn cache() -> Cache {
    Cache::in_memory(&CacheConfig::default())
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn entry_is_live_until_the_exact_deadline() {
    let cache = cache();
    cache.set("k", "v", Some(Duration::from_secs(10))).await;

    advance(Duration::from_millis(9_999)).await;
    assert!(cache.exists("k").await, "one millisecond before the deadline the entry is live");

    advance(Duration::from_millis(1)).await;
    assert!(!cache.exists("k").await, "at the deadline the entry is gone");
}

#[tokio::test(start_paused = true)]
async fn large_ttl_does_not_overflow() {
    let cache = cache();
    let hundred_years = Duration::from_secs(100 * 365 * 24 * 3600);
    cache.set("long-lived", "v", Some(hundred_years)).await;

    advance(Duration::from_secs(3600)).await;
    assert_eq!(cache.get("long-lived").await, Some(Bytes::from("v")));
}

#[tokio::test(start_paused = true)]
async fn replacing_ttl_moves_the_deadline() {
    let cache = cache();
    cache.set("k", "short", Some(Duration::from_secs(1))).await;
    cache.set("k", "long", Some(Duration::from_secs(60))).await;

    advance(Duration::from_secs(2)).await;
    assert_eq!(cache.get("k").await, Some(Bytes::from("long")));

    advance(Duration::from_secs(60)).await;
    assert_eq!(cache.get("k").await, None);
}

#[tokio::test(start_paused = true)]
async fn guard_window_reopens_after_ttl() {
    let cache = cache();
    let window = Duration::from_secs(3600);
    assert!(cache.set_if_absent("webhook:evt_1", "seen", window).await);

    advance(Duration::from_secs(3599)).await;
    assert!(!cache.set_if_absent("webhook:evt_1", "seen", window).await);

    advance(Duration::from_secs(1)).await;
    assert!(cache.set_if_absent("webhook:evt_1", "seen", window).await);
}

// ============================================================================
// Capacity
// ============================================================================

#[tokio::test(start_paused = true)]
async fn expired_entries_are_dropped_before_lru_eviction() {
    let backend = MemoryCache::with_capacity(2);
    backend.set("stale", Bytes::from("1"), Some(Duration::from_secs(1))).await.expect("set");
    backend.set("live", Bytes::from("2"), None).await.expect("set");

    advance(Duration::from_secs(2)).await;
    backend.set("new", Bytes::from("3"), None).await.expect("set");

    // The expired entry made room, so the live one survived.
    assert_eq!(backend.get("live").await.expect("get"), Some(Bytes::from("2")));
    assert_eq!(backend.get("new").await.expect("get"), Some(Bytes::from("3")));
    assert_eq!(backend.len(), 2);
}

#[tokio::test]
async fn capacity_bound_holds_under_churn() {
    let config = CacheConfig::builder().capacity(16).build().expect("config");
    let cache = Cache::in_memory(&config);
    for i in 0..200 {
        cache.set(&format!("key:{i}"), i.to_string(), None).await;
    }

    let survivors = {
        let mut count = 0;
        for i in 0..200 {
            if cache.exists(&format!("key:{i}")).await {
                count += 1;
            }
        }
        count
    };
    assert_eq!(survivors, 16);
    assert!(cache.exists("key:199").await, "most recent write is retained");
    assert!(!cache.exists("key:0").await, "oldest write is evicted");
}
