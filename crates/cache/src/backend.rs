//! Cache backend trait definition.
//!
//! [`CacheBackend`] is the capability interface both concrete backends
//! implement: [`MemoryCache`](crate::MemoryCache) for in-process use and
//! [`RedisCache`](crate::RedisCache) for a shared distributed cache. Keys seen
//! by a backend are already prefixed by the [`Cache`](crate::Cache) facade.
//!
//! Backends are chosen once at startup and held behind an `Arc<dyn
//! CacheBackend>`, so tests can substitute any deterministic implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CacheResult;

/// Abstract key-value cache with optional per-entry expiry.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](CacheBackend::get) | Read a live value |
/// | [`set`](CacheBackend::set) | Write a value, optionally expiring |
/// | [`set_if_absent`](CacheBackend::set_if_absent) | Atomic insert-if-absent |
/// | [`delete`](CacheBackend::delete) | Remove a key |
/// | [`exists`](CacheBackend::exists) | Presence check without reading |
/// | [`clear_prefix`](CacheBackend::clear_prefix) | Remove every key under a prefix |
///
/// An expired entry is indistinguishable from an absent one for every
/// method.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend identity used in diagnostics (`"memory"`, `"redis"`).
    fn name(&self) -> &'static str;

    /// Retrieves the live value stored at `key`.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    /// Stores `value` at `key`, replacing any previous value and expiry.
    ///
    /// With `ttl: None` the entry never expires on its own.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> CacheResult<()>;

    /// Stores `value` only if `key` holds no live value.
    ///
    /// Returns `true` when the value was written. The check and the write are
    /// a single atomic step, so of two concurrent callers exactly one wins.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<bool>;

    /// Removes `key`. Deleting an absent key is not an error.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Returns whether `key` holds a live value.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Removes every key starting with `prefix` and returns how many were removed.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64>;
}
