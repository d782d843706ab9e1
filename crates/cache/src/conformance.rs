//! Conformance suite for [`CacheBackend`] implementations.
//!
//! Every backend runs the same checks, which is how the in-process and Redis
//! backends are held to identical observable behavior. Keys are namespaced
//! per process so the suite can run against a shared Redis server.
//!
//! # Usage
//!
//! ```no_run
//! use forge_cache::{MemoryCache, conformance};
//!
//! #[tokio::test]
//! async fn crud_set_then_get_returns_value() {
//!     conformance::crud_set_then_get_returns_value(&MemoryCache::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | CRUD | `get` / `set` / `delete` / `exists` semantics |
//! | TTL | expiry, zero TTL, TTL cleared by overwrite |
//! | Insert-if-absent | first writer wins, slot frees after expiry |
//! | Prefix | `clear_prefix` scoping |
//! | Concurrent | exactly one `set_if_absent` winner under contention |
//!
//! TTL checks sleep on the real clock, so they take a few hundred
//! milliseconds each.

use std::{
    sync::{Arc, LazyLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;

use crate::backend::CacheBackend;

static RUN_ID: LazyLock<String> = LazyLock::new(|| {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("conformance-{}-{nanos}", std::process::id())
});

const SHORT_TTL: Duration = Duration::from_millis(100);
const PAST_SHORT_TTL: Duration = Duration::from_millis(400);

/// Returns `name` inside this process's conformance namespace.
#[must_use]
pub fn key(name: &str) -> String {
    format!("{}:{name}", *RUN_ID)
}

// ============================================================================
// CRUD
// ============================================================================

/// `get` on a missing key returns `Ok(None)`.
pub async fn crud_get_returns_none_for_missing_key<B: CacheBackend>(backend: &B) {
    let result = backend.get(&key("missing")).await;
    assert!(result.is_ok(), "get should not error on missing key: {result:?}");
    assert_eq!(result.expect("checked above"), None);
}

/// `set` then `get` round-trips the value.
pub async fn crud_set_then_get_returns_value<B: CacheBackend>(backend: &B) {
    let k = key("roundtrip");
    backend.set(&k, Bytes::from("v1"), None).await.expect("set");
    assert_eq!(backend.get(&k).await.expect("get"), Some(Bytes::from("v1")));
}

/// `set` on an existing key overwrites the value.
pub async fn crud_set_overwrites_existing<B: CacheBackend>(backend: &B) {
    let k = key("overwrite");
    backend.set(&k, Bytes::from("original"), None).await.expect("set");
    backend.set(&k, Bytes::from("updated"), None).await.expect("overwrite");
    assert_eq!(backend.get(&k).await.expect("get"), Some(Bytes::from("updated")));
}

/// `delete` of a missing key is a silent no-op.
pub async fn crud_delete_missing_is_noop<B: CacheBackend>(backend: &B) {
    let result = backend.delete(&key("ghost")).await;
    assert!(result.is_ok(), "delete of missing key should not error: {result:?}");
}

/// `delete` removes a key and `exists` follows it.
pub async fn crud_delete_removes_key<B: CacheBackend>(backend: &B) {
    let k = key("doomed");
    backend.set(&k, Bytes::from("v"), None).await.expect("set");
    assert!(backend.exists(&k).await.expect("exists"));

    backend.delete(&k).await.expect("delete");
    assert_eq!(backend.get(&k).await.expect("get"), None);
    assert!(!backend.exists(&k).await.expect("exists"));
}

/// Binary values survive unchanged, including an empty value.
pub async fn crud_binary_values_roundtrip<B: CacheBackend>(backend: &B) {
    let binary = Bytes::from_static(&[0, 159, 146, 150, 255]);
    backend.set(&key("binary"), binary.clone(), None).await.expect("set binary");
    backend.set(&key("empty"), Bytes::new(), None).await.expect("set empty");

    assert_eq!(backend.get(&key("binary")).await.expect("get"), Some(binary));
    assert_eq!(backend.get(&key("empty")).await.expect("get"), Some(Bytes::new()));
}

// ============================================================================
// TTL
// ============================================================================

/// An entry disappears once its TTL has passed.
pub async fn ttl_key_expires<B: CacheBackend>(backend: &B) {
    let k = key("expiring");
    backend.set(&k, Bytes::from("v"), Some(SHORT_TTL)).await.expect("set");
    assert!(backend.exists(&k).await.expect("exists before expiry"));

    tokio::time::sleep(PAST_SHORT_TTL).await;
    assert_eq!(backend.get(&k).await.expect("get"), None);
    assert!(!backend.exists(&k).await.expect("exists after expiry"));
}

/// A zero TTL leaves nothing readable.
pub async fn ttl_zero_is_immediately_expired<B: CacheBackend>(backend: &B) {
    let k = key("zero-ttl");
    backend.set(&k, Bytes::from("v"), Some(Duration::ZERO)).await.expect("set");
    assert_eq!(backend.get(&k).await.expect("get"), None);
}

/// Overwriting without a TTL makes the entry permanent.
pub async fn ttl_overwrite_clears_ttl<B: CacheBackend>(backend: &B) {
    let k = key("made-permanent");
    backend.set(&k, Bytes::from("temp"), Some(SHORT_TTL)).await.expect("set with ttl");
    backend.set(&k, Bytes::from("permanent"), None).await.expect("overwrite");

    tokio::time::sleep(PAST_SHORT_TTL).await;
    assert_eq!(backend.get(&k).await.expect("get"), Some(Bytes::from("permanent")));
}

// ============================================================================
// Insert-if-absent
// ============================================================================

/// The first `set_if_absent` writes, the second leaves the value alone.
pub async fn set_if_absent_first_writer_wins<B: CacheBackend>(backend: &B) {
    let k = key("once");
    let ttl = Duration::from_secs(30);
    assert!(backend.set_if_absent(&k, Bytes::from("first"), ttl).await.expect("first"));
    assert!(!backend.set_if_absent(&k, Bytes::from("second"), ttl).await.expect("second"));
    assert_eq!(backend.get(&k).await.expect("get"), Some(Bytes::from("first")));
}

/// Once the guarded entry expires, the key can be claimed again.
pub async fn set_if_absent_after_expiry<B: CacheBackend>(backend: &B) {
    let k = key("reclaimable");
    assert!(backend.set_if_absent(&k, Bytes::from("a"), SHORT_TTL).await.expect("claim"));
    tokio::time::sleep(PAST_SHORT_TTL).await;
    assert!(backend.set_if_absent(&k, Bytes::from("b"), SHORT_TTL).await.expect("reclaim"));
}

// ============================================================================
// Prefix
// ============================================================================

/// `clear_prefix` removes exactly the keys under the prefix.
pub async fn clear_prefix_is_scoped<B: CacheBackend>(backend: &B) {
    let inside = key("scope:inside:");
    let outside = key("scope:outside");
    backend.set(&format!("{inside}a"), Bytes::from("1"), None).await.expect("set a");
    backend.set(&format!("{inside}b"), Bytes::from("2"), None).await.expect("set b");
    backend.set(&outside, Bytes::from("3"), None).await.expect("set outside");

    let removed = backend.clear_prefix(&inside).await.expect("clear_prefix");
    assert_eq!(removed, 2);
    assert!(!backend.exists(&format!("{inside}a")).await.expect("exists a"));
    assert!(backend.exists(&outside).await.expect("exists outside"));
}

// ============================================================================
// Concurrent
// ============================================================================

/// Of many concurrent `set_if_absent` calls on one key, exactly one wins.
pub async fn concurrent_set_if_absent_one_winner<B: CacheBackend + 'static>(backend: Arc<B>) {
    let k = key("contended");
    let mut handles = Vec::new();
    for i in 0..16 {
        let backend = Arc::clone(&backend);
        let k = k.clone();
        handles.push(tokio::spawn(async move {
            backend
                .set_if_absent(&k, Bytes::from(i.to_string()), Duration::from_secs(30))
                .await
                .expect("set_if_absent")
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("task panicked") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one writer should win");
}

/// Runs every check in sequence against one backend.
pub async fn run_all<B: CacheBackend + 'static>(backend: Arc<B>) {
    crud_get_returns_none_for_missing_key(&*backend).await;
    crud_set_then_get_returns_value(&*backend).await;
    crud_set_overwrites_existing(&*backend).await;
    crud_delete_missing_is_noop(&*backend).await;
    crud_delete_removes_key(&*backend).await;
    crud_binary_values_roundtrip(&*backend).await;
    ttl_key_expires(&*backend).await;
    ttl_zero_is_immediately_expired(&*backend).await;
    ttl_overwrite_clears_ttl(&*backend).await;
    set_if_absent_first_writer_wins(&*backend).await;
    set_if_absent_after_expiry(&*backend).await;
    clear_prefix_is_scoped(&*backend).await;
    concurrent_set_if_absent_one_winner(Arc::clone(&backend)).await;

    backend.clear_prefix(&key("")).await.expect("cleanup");
}
