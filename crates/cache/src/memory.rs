//! In-process cache backend.
//!
//! [`MemoryCache`] is the backend used when no distributed cache is
//! configured, when the distributed cache cannot be reached at startup, or
//! when `FORCE_MEMORY_CACHE` is set. It is also the fallback store the
//! [`Cache`](crate::Cache) facade keeps beside a Redis primary.
//!
//! # Bookkeeping
//!
//! - **Entries**: `HashMap<String, Entry>` holding value, expiry, and recency tick
//! - **Expiry index**: `BTreeSet<(Instant, key)>` ordered by deadline
//! - **Recency index**: `BTreeMap<tick, key>`; the first entry is the least recently used
//!
//! All three live behind one [`parking_lot::Mutex`], so an eviction can never
//! observe the indexes out of step with the map.
//!
//! Expired entries are dropped lazily when touched, and the front of the
//! expiry index is drained on every write, which bounds the work per call to
//! the number of entries that actually expired. There is no background task.
//!
//! Time comes from [`tokio::time::Instant`], so tests running on a paused
//! runtime can move the clock with `tokio::time::advance`.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{backend::CacheBackend, error::CacheResult};

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
    tick: u64,
}

#[derive(Default)]
struct Store {
    entries: HashMap<String, Entry>,
    expiries: BTreeSet<(Instant, String)>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl Store {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        if let Some(at) = entry.expires_at {
            self.expiries.remove(&(at, key.to_owned()));
        }
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let mut purged = 0;
        while let Some((at, _)) = self.expiries.first() {
            if *at > now {
                break;
            }
            let Some((_, key)) = self.expiries.pop_first() else { break };
            if let Some(entry) = self.entries.remove(&key) {
                self.recency.remove(&entry.tick);
                purged += 1;
            }
        }
        purged
    }

    /// Returns the live value for `key`, dropping it first if it has expired.
    fn lookup(&mut self, key: &str, now: Instant, touch: bool) -> Option<Bytes> {
        let expired = self.entries.get(key)?.expires_at.is_some_and(|at| at <= now);
        if expired {
            self.remove(key);
            return None;
        }
        if !touch {
            return self.entries.get(key).map(|entry| entry.value.clone());
        }

        let tick = self.bump();
        let entry = self.entries.get_mut(key)?;
        let previous = std::mem::replace(&mut entry.tick, tick);
        let value = entry.value.clone();
        self.recency.remove(&previous);
        self.recency.insert(tick, key.to_owned());
        Some(value)
    }

    /// Inserts `key`, evicting the least recently used entry if the store is full.
    fn insert(
        &mut self,
        key: &str,
        value: Bytes,
        expires_at: Option<Instant>,
        capacity: Option<usize>,
    ) -> Option<String> {
        self.remove(key);

        let mut evicted = None;
        if let Some(capacity) = capacity
            && self.entries.len() >= capacity
            && let Some((_, lru_key)) = self.recency.pop_first()
        {
            if let Some(entry) = self.entries.remove(&lru_key)
                && let Some(at) = entry.expires_at
            {
                self.expiries.remove(&(at, lru_key.clone()));
            }
            evicted = Some(lru_key);
        }

        let tick = self.bump();
        if let Some(at) = expires_at {
            self.expiries.insert((at, key.to_owned()));
        }
        self.recency.insert(tick, key.to_owned());
        self.entries.insert(key.to_owned(), Entry { value, expires_at, tick });
        evicted
    }
}

/// In-process cache with lazy TTL expiry and optional LRU capacity bound.
///
/// # Cloning
///
/// `MemoryCache` is cheaply cloneable via [`Arc`]. All clones share the same
/// underlying store.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use bytes::Bytes;
/// use forge_cache::{CacheBackend, MemoryCache};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let cache = MemoryCache::with_capacity(2);
/// cache.set("a", Bytes::from("1"), None).await.unwrap();
/// cache.set("b", Bytes::from("2"), Some(Duration::from_secs(60))).await.unwrap();
/// cache.set("c", Bytes::from("3"), None).await.unwrap();
///
/// // "a" was least recently used when "c" arrived.
/// assert_eq!(cache.get("a").await.unwrap(), None);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MemoryCache {
    store: Arc<Mutex<Store>>,
    capacity: Option<usize>,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("capacity", &self.capacity)
            .field("entries", &self.store.lock().entries.len())
            .finish()
    }
}

impl MemoryCache {
    /// Creates an unbounded in-process cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache holding at most `capacity` entries.
    ///
    /// A `capacity` of zero is treated as one; [`CacheConfig`](crate::CacheConfig)
    /// rejects zero before it gets here.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { store: Arc::default(), capacity: Some(capacity.max(1)) }
    }

    /// Returns the configured capacity bound, if any.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Drops every expired entry and returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut store = self.store.lock();
        store.purge_expired(Instant::now());
        store.entries.len()
    }

    /// Returns `true` if no live entries remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.store.lock().purge_expired(Instant::now())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        Ok(self.store.lock().lookup(key, Instant::now(), true))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> CacheResult<()> {
        let now = Instant::now();
        let mut store = self.store.lock();
        store.purge_expired(now);
        if let Some(evicted) = store.insert(key, value, ttl.and_then(|ttl| expiry(now, ttl)), self.capacity) {
            tracing::trace!(backend = "memory", key = %evicted, "evicted least recently used entry");
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        let mut store = self.store.lock();
        store.purge_expired(now);
        if store.lookup(key, now, false).is_some() {
            return Ok(false);
        }
        store.insert(key, value, expiry(now, ttl), self.capacity);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.store.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.store.lock().lookup(key, Instant::now(), false).is_some())
    }

    async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let now = Instant::now();
        let mut store = self.store.lock();
        store.purge_expired(now);
        let doomed: Vec<String> =
            store.entries.keys().filter(|key| key.starts_with(prefix)).cloned().collect();
        for key in &doomed {
            store.remove(key);
        }
        Ok(doomed.len() as u64)
    }
}

/// Deadline for `ttl` from `now`. A TTL past the clock's range never expires.
fn expiry(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(ttl)
}
