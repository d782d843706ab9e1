//! Shared test utilities for cache testing.
//!
//! Feature-gated behind `testutil`. Downstream crates enable it in their
//! `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! forge-cache = { path = "../cache", features = ["testutil"] }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    backend::CacheBackend,
    cache::Cache,
    config::CacheConfig,
    error::{CacheError, CacheResult},
    memory::MemoryCache,
};

/// Build a [`CacheConfig`] with the given prefix and debug reporting on.
///
/// # Panics
///
/// Panics if `prefix` is empty.
#[must_use]
pub fn test_config(prefix: &str) -> CacheConfig {
    CacheConfig::builder().prefix(prefix).debug(true).build().expect("valid test cache config")
}

/// Build an in-process [`Cache`] under `prefix`.
#[must_use]
pub fn memory_cache(prefix: &str) -> Cache {
    Cache::in_memory(&test_config(prefix))
}

/// A backend wrapping a [`MemoryCache`] that can be switched off.
///
/// While down, every call fails with [`CacheError::Unavailable`] and the
/// wrapped store is left untouched, which models a Redis outage with the
/// server's data intact behind it.
#[derive(Clone, Default)]
pub struct ToggleBackend {
    store: MemoryCache,
    down: Arc<AtomicBool>,
    failures: Arc<AtomicU64>,
}

impl ToggleBackend {
    /// Creates a healthy backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that fails every call until [`recover`](Self::recover).
    #[must_use]
    pub fn unavailable() -> Self {
        let backend = Self::default();
        backend.fail();
        backend
    }

    /// Starts failing every call.
    pub fn fail(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    /// Stops failing calls.
    pub fn recover(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    /// Number of calls rejected while down.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// The store behind the switch.
    #[must_use]
    pub fn store(&self) -> &MemoryCache {
        &self.store
    }

    fn check(&self) -> CacheResult<()> {
        if self.down.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(CacheError::unavailable("backend switched off"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for ToggleBackend {
    fn name(&self) -> &'static str {
        "toggle"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        self.check()?;
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> CacheResult<()> {
        self.check()?;
        self.store.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<bool> {
        self.check()?;
        self.store.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check()?;
        self.store.delete(key).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        self.store.exists(key).await
    }

    async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        self.check()?;
        self.store.clear_prefix(prefix).await
    }
}

/// Assert that a cache read returned exactly `expected`.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use forge_cache::{Cache, assert_cached};
///
/// # async fn demo(cache: Cache) {
/// cache.set("k", "v", None).await;
/// assert_cached!(cache.get("k").await, "v");
/// # }
/// ```
#[macro_export]
macro_rules! assert_cached {
    ($read:expr, $expected:expr) => {
        match $read {
            Some(value) => assert_eq!(
                &value[..],
                AsRef::<[u8]>::as_ref(&$expected),
                "cached value differs from expected",
            ),
            None => panic!("expected a cached value, got a miss"),
        }
    };
}

/// Assert that a cache read was a miss.
#[macro_export]
macro_rules! assert_miss {
    ($read:expr) => {
        match $read {
            None => {},
            Some(value) => panic!("expected a miss, got {:?}", value),
        }
    };
}
