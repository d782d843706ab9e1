//! The cache facade shared by every Forge component.
//!
//! [`Cache`] owns the selected backend, applies the key namespace, absorbs
//! backend failures, and counts hits and misses. It is the only type the
//! token and webhook code paths talk to.
//!
//! # Failure Semantics
//!
//! The cache is advisory: it guards revocation and replay state, it is not a
//! system of record. A failing backend therefore never surfaces as an error:
//!
//! | Operation | Primary fails | Result |
//! |-----------|---------------|--------|
//! | `get` / `exists` | yes | a miss, unless the fallback store holds the key |
//! | `set` | yes | written to the fallback store |
//! | `set_if_absent` | yes | decided by the fallback store, else `true` |
//! | `delete` / `clear` | either way | applied to primary and fallback |
//!
//! The fallback store is an in-process [`MemoryCache`] attached whenever the
//! primary backend is not itself in-process. Reads and `set_if_absent`
//! consult it before the primary, so revocation and replay entries written
//! during an outage keep counting after the primary recovers, until their
//! TTL runs out.
//!
//! # Diagnostics
//!
//! Each operation emits one event carrying the backend name, the prefixed
//! key, the outcome, and the latency in microseconds. With
//! [`CacheConfig::debug`] set the event is logged at INFO, otherwise at TRACE.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use fail::fail_point;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    backend::CacheBackend,
    config::CacheConfig,
    error::{CacheError, CacheResult},
    memory::MemoryCache,
    redis_cache::RedisCache,
};

/// Point-in-time hit/miss counters for a [`Cache`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads that found a live value.
    pub hits: u64,
    /// Reads that found nothing, including absorbed backend failures.
    pub misses: u64,
    /// `hits + misses`.
    pub total: u64,
    /// `hits / total`, or `0.0` before the first read.
    pub hit_rate: f64,
    /// Name of the primary backend.
    pub backend: &'static str,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

struct Inner {
    primary: Arc<dyn CacheBackend>,
    fallback: Option<MemoryCache>,
    prefix: String,
    debug: bool,
    counters: Counters,
}

/// Namespaced, failure-absorbing cache handle.
///
/// Cloning is cheap; clones share the backend and the counters.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use forge_cache::{Cache, CacheConfig};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let cache = Cache::connect(&CacheConfig::default()).await.unwrap();
/// cache.set("session:42", "alice", Some(Duration::from_secs(60))).await;
///
/// assert_eq!(cache.get("session:42").await.as_deref(), Some(&b"alice"[..]));
/// assert_eq!(cache.stats().hits, 1);
/// # });
/// ```
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.inner.primary.name())
            .field("prefix", &self.inner.prefix)
            .field("fallback", &self.inner.fallback.is_some())
            .finish()
    }
}

#[derive(Clone, Copy)]
enum Outcome {
    Hit,
    Miss,
    Stored,
    Skipped,
    Deleted,
    Cleared,
    Error,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Stored => "stored",
            Self::Skipped => "skipped",
            Self::Deleted => "deleted",
            Self::Cleared => "cleared",
            Self::Error => "error",
        }
    }
}

/// Injects a primary-backend outage when the `cache-primary` fail point is set.
fn primary_fault() -> CacheResult<()> {
    fail_point!("cache-primary", |_| Err(CacheError::unavailable("injected primary outage")));
    Ok(())
}

impl Cache {
    /// Selects and opens a backend according to `config`.
    ///
    /// The distributed backend is used when a Redis URL is configured, the
    /// in-process override is off, and the server answers within the connect
    /// timeout. Every other case yields the in-process backend.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] only if `config` is invalid. An
    /// unreachable Redis server is not an error.
    #[tracing::instrument(skip(config), fields(prefix = %config.prefix()))]
    pub async fn connect(config: &CacheConfig) -> CacheResult<Self> {
        config.validate()?;

        match config.redis_url() {
            Some(url) if !config.force_memory() => {
                match RedisCache::connect(url, config.connect_timeout(), config.operation_timeout())
                    .await
                {
                    Ok(redis) => {
                        tracing::info!(backend = "redis", "cache backend selected");
                        return Ok(Self::with_backend(Arc::new(redis), config));
                    },
                    Err(error) => {
                        tracing::warn!(
                            error = %error,
                            "redis unreachable, falling back to in-process cache"
                        );
                    },
                }
            },
            Some(_) => {
                tracing::info!("in-process cache forced despite configured redis url");
            },
            None => {},
        }

        tracing::info!(backend = "memory", capacity = ?config.capacity(), "cache backend selected");
        Ok(Self::in_memory(config))
    }

    /// Builds a cache over an in-process backend only.
    #[must_use]
    pub fn in_memory(config: &CacheConfig) -> Self {
        let backend = match config.capacity() {
            Some(capacity) => MemoryCache::with_capacity(capacity),
            None => MemoryCache::new(),
        };
        Self::assemble(Arc::new(backend), None, config)
    }

    /// Builds a cache over an arbitrary primary backend with an in-process
    /// fallback store beside it.
    #[must_use]
    pub fn with_backend(primary: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        let fallback = match config.capacity() {
            Some(capacity) => MemoryCache::with_capacity(capacity),
            None => MemoryCache::new(),
        };
        Self::assemble(primary, Some(fallback), config)
    }

    /// Unbounded in-process cache with the default namespace.
    #[must_use]
    pub fn memory() -> Self {
        Self::in_memory(&CacheConfig::default())
    }

    fn assemble(
        primary: Arc<dyn CacheBackend>,
        fallback: Option<MemoryCache>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                primary,
                fallback,
                prefix: config.prefix().to_owned(),
                debug: config.debug(),
                counters: Counters::default(),
            }),
        }
    }

    /// Returns the primary backend's name.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.inner.primary.name()
    }

    /// Returns the key namespace.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.inner.prefix)
    }

    async fn on_primary<T>(&self, op: impl Future<Output = CacheResult<T>>) -> CacheResult<T> {
        primary_fault()?;
        op.await
    }

    fn report(
        &self,
        op: &'static str,
        backend: &'static str,
        key: &str,
        outcome: Outcome,
        started: Instant,
    ) {
        let latency_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        let outcome = outcome.as_str();
        if self.inner.debug {
            tracing::info!(op, backend, key, outcome, latency_us, "cache operation");
        } else {
            tracing::trace!(op, backend, key, outcome, latency_us, "cache operation");
        }
    }

    fn record_read(&self, hit: bool) {
        let counter = if hit { &self.inner.counters.hits } else { &self.inner.counters.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads the live value at `key`. Backend failures read as a miss.
    ///
    /// The fallback store is read first, so entries written there during an
    /// outage stay visible after the primary recovers.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let started = Instant::now();
        let key = self.key(key);
        let primary = self.inner.primary.name();

        if let Some(fallback) = &self.inner.fallback
            && let Some(value) = fallback.get(&key).await.ok().flatten()
        {
            self.record_read(true);
            self.report("get", fallback.name(), &key, Outcome::Hit, started);
            return Some(value);
        }

        let value = match self.on_primary(self.inner.primary.get(&key)).await {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(backend = primary, key = %key, error = %error, "cache read failed");
                self.record_read(false);
                self.report("get", primary, &key, Outcome::Error, started);
                return None;
            },
        };

        self.record_read(value.is_some());
        let outcome = if value.is_some() { Outcome::Hit } else { Outcome::Miss };
        self.report("get", primary, &key, outcome, started);
        value
    }

    /// Stores `value` at `key`, optionally expiring after `ttl`.
    ///
    /// A failed primary write lands in the fallback store instead. A
    /// successful one drops any fallback entry that would shadow it.
    #[tracing::instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: impl Into<Bytes>, ttl: Option<Duration>) {
        let started = Instant::now();
        let key = self.key(key);
        let value = value.into();
        let primary = self.inner.primary.name();

        match self.on_primary(self.inner.primary.set(&key, value.clone(), ttl)).await {
            Ok(()) => {
                self.drop_from_fallback(&key).await;
                self.report("set", primary, &key, Outcome::Stored, started);
            },
            Err(error) => {
                tracing::warn!(backend = primary, key = %key, error = %error, "cache write failed");
                let stored_in = match &self.inner.fallback {
                    Some(fallback) => {
                        fallback.set(&key, value, ttl).await.ok().map(|()| fallback.name())
                    },
                    None => None,
                };
                match stored_in {
                    Some(backend) => self.report("set", backend, &key, Outcome::Stored, started),
                    None => self.report("set", primary, &key, Outcome::Error, started),
                }
            },
        }
    }

    /// Stores `value` at `key` unless a live value is already there.
    ///
    /// Returns `true` when this call wrote the value. A live fallback entry
    /// counts as present. If neither the primary nor a fallback store can
    /// decide, the write is treated as first.
    #[tracing::instrument(skip(self, value))]
    pub async fn set_if_absent(&self, key: &str, value: impl Into<Bytes>, ttl: Duration) -> bool {
        let started = Instant::now();
        let key = self.key(key);
        let value = value.into();
        let primary = self.inner.primary.name();

        if let Some(fallback) = &self.inner.fallback
            && fallback.exists(&key).await.unwrap_or(false)
        {
            self.report("set_if_absent", fallback.name(), &key, Outcome::Skipped, started);
            return false;
        }

        let (written, backend) = match self
            .on_primary(self.inner.primary.set_if_absent(&key, value.clone(), ttl))
            .await
        {
            Ok(written) => (written, primary),
            Err(error) => {
                tracing::warn!(backend = primary, key = %key, error = %error, "cache write failed");
                match &self.inner.fallback {
                    Some(fallback) => (
                        fallback.set_if_absent(&key, value, ttl).await.unwrap_or(true),
                        fallback.name(),
                    ),
                    None => (true, primary),
                }
            },
        };

        let outcome = if written { Outcome::Stored } else { Outcome::Skipped };
        self.report("set_if_absent", backend, &key, outcome, started);
        written
    }

    /// Removes `key` from the primary and fallback stores.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, key: &str) {
        let started = Instant::now();
        let key = self.key(key);
        let primary = self.inner.primary.name();

        let outcome = match self.on_primary(self.inner.primary.delete(&key)).await {
            Ok(()) => Outcome::Deleted,
            Err(error) => {
                tracing::warn!(backend = primary, key = %key, error = %error, "cache delete failed");
                Outcome::Error
            },
        };
        self.drop_from_fallback(&key).await;
        self.report("delete", primary, &key, outcome, started);
    }

    async fn drop_from_fallback(&self, key: &str) {
        if let Some(fallback) = &self.inner.fallback
            && let Err(error) = fallback.delete(key).await
        {
            tracing::warn!(backend = fallback.name(), key, error = %error, "cache delete failed");
        }
    }

    /// Returns whether `key` holds a live value. Backend failures read as absent.
    ///
    /// Like [`get`](Self::get), the fallback store is consulted first.
    #[tracing::instrument(skip(self))]
    pub async fn exists(&self, key: &str) -> bool {
        let started = Instant::now();
        let key = self.key(key);
        let primary = self.inner.primary.name();

        if let Some(fallback) = &self.inner.fallback
            && fallback.exists(&key).await.unwrap_or(false)
        {
            self.report("exists", fallback.name(), &key, Outcome::Hit, started);
            return true;
        }

        let present = match self.on_primary(self.inner.primary.exists(&key)).await {
            Ok(present) => present,
            Err(error) => {
                tracing::warn!(backend = primary, key = %key, error = %error, "cache read failed");
                self.report("exists", primary, &key, Outcome::Error, started);
                return false;
            },
        };

        let outcome = if present { Outcome::Hit } else { Outcome::Miss };
        self.report("exists", primary, &key, outcome, started);
        present
    }

    /// Removes every key in this cache's namespace and returns how many were removed.
    ///
    /// Keys belonging to other prefixes on a shared backend are untouched.
    #[tracing::instrument(skip(self), fields(prefix = %self.inner.prefix))]
    pub async fn clear(&self) -> u64 {
        let started = Instant::now();
        let namespace = self.key("");
        let primary = self.inner.primary.name();

        let mut removed = match self.on_primary(self.inner.primary.clear_prefix(&namespace)).await {
            Ok(removed) => removed,
            Err(error) => {
                tracing::warn!(backend = primary, error = %error, "cache clear failed");
                0
            },
        };
        if let Some(fallback) = &self.inner.fallback {
            removed += fallback.clear_prefix(&namespace).await.unwrap_or(0);
        }
        self.report("clear", primary, &namespace, Outcome::Cleared, started);
        removed
    }

    /// Reads and decodes a JSON value. Undecodable values read as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(key, error = %error, "discarding undecodable cache value");
                None
            },
        }
    }

    /// Encodes `value` as JSON and stores it.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if `value` cannot be encoded.
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let encoded = serde_json::to_vec(value)
            .map_err(|e| CacheError::serialization_with_source("failed to encode value", e))?;
        self.set(key, encoded, ttl).await;
        Ok(())
    }

    /// Returns a snapshot of the hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.inner.counters.hits.load(Ordering::Relaxed);
        let misses = self.inner.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 { 0.0 } else { hits as f64 / total as f64 };
        CacheStats { hits, misses, total, hit_rate, backend: self.inner.primary.name() }
    }
}
