//! Configuration for the cache facade and its backends.
//!
//! [`CacheConfig`] carries everything [`Cache::connect`](crate::Cache::connect)
//! needs to pick and open a backend. It is validated once at construction, so
//! a `CacheConfig` in hand is always usable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Default key namespace.
pub const DEFAULT_PREFIX: &str = "forge";

/// Default bound on a single distributed-cache round trip (250 ms).
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(250);

/// Default bound on establishing the distributed-cache connection (2 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for [`Cache`](crate::Cache).
///
/// # Backend Selection
///
/// | `redis_url` | `force_memory` | Backend |
/// |-------------|----------------|---------|
/// | `None` | any | in-process |
/// | `Some(_)` | `true` | in-process |
/// | `Some(_)` | `false` | Redis, or in-process if the connection fails |
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use forge_cache::CacheConfig;
///
/// let config = CacheConfig::builder()
///     .redis_url("redis://127.0.0.1:6379")
///     .prefix("forge-staging")
///     .operation_timeout(Duration::from_millis(100))
///     .build()?;
/// assert_eq!(config.prefix(), "forge-staging");
/// # Ok::<(), forge_cache::CacheError>(())
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Distributed cache connection string.
    #[serde(default)]
    pub(crate) redis_url: Option<String>,

    /// Skip the distributed cache even when a URL is configured.
    #[serde(default)]
    pub(crate) force_memory: bool,

    /// Namespace prepended to every key as `{prefix}:`.
    #[serde(default = "default_prefix")]
    pub(crate) prefix: String,

    /// Report every operation at INFO instead of TRACE.
    #[serde(default)]
    pub(crate) debug: bool,

    /// Optional entry bound for the in-process backend.
    #[serde(default)]
    pub(crate) capacity: Option<usize>,

    /// Bound on a single distributed-cache round trip.
    #[serde(with = "humantime_serde", default = "default_operation_timeout")]
    pub(crate) operation_timeout: Duration,

    /// Bound on establishing the distributed-cache connection.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub(crate) connect_timeout: Duration,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_owned()
}

fn default_operation_timeout() -> Duration {
    DEFAULT_OPERATION_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            force_memory: false,
            prefix: default_prefix(),
            debug: false,
            capacity: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

// The connection string may embed a password.
impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("force_memory", &self.force_memory)
            .field("prefix", &self.prefix)
            .field("debug", &self.debug)
            .field("capacity", &self.capacity)
            .field("operation_timeout", &self.operation_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[bon::bon]
impl CacheConfig {
    /// Creates a new configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if:
    /// - `prefix` is empty
    /// - `capacity` is zero
    /// - either timeout is zero
    #[builder]
    pub fn new(
        #[builder(into)] redis_url: Option<String>,
        #[builder(default)] force_memory: bool,
        #[builder(into, default = default_prefix())] prefix: String,
        #[builder(default)] debug: bool,
        capacity: Option<usize>,
        #[builder(default = DEFAULT_OPERATION_TIMEOUT)] operation_timeout: Duration,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
    ) -> CacheResult<Self> {
        let config = Self {
            redis_url,
            force_memory,
            prefix,
            debug,
            capacity,
            operation_timeout,
            connect_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// Deserialized configurations bypass the builder, so
    /// [`Cache::connect`](crate::Cache::connect) calls this again.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] describing the first violated invariant.
    pub fn validate(&self) -> CacheResult<()> {
        if self.prefix.is_empty() {
            return Err(CacheError::config("prefix cannot be empty"));
        }
        if self.capacity == Some(0) {
            return Err(CacheError::config("capacity must be at least 1"));
        }
        if self.operation_timeout.is_zero() {
            return Err(CacheError::config("operation_timeout must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(CacheError::config("connect_timeout must be non-zero"));
        }
        Ok(())
    }

    /// Returns the distributed cache connection string, if configured.
    #[must_use]
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref()
    }

    /// Returns whether the in-process backend is forced.
    #[must_use]
    pub fn force_memory(&self) -> bool {
        self.force_memory
    }

    /// Returns the key namespace.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns whether verbose per-operation reporting is enabled.
    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Returns the in-process capacity bound.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Returns the per-operation timeout for the distributed cache.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Returns the connect timeout for the distributed cache.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns `true` when [`Cache::connect`](crate::Cache::connect) should
    /// attempt the distributed backend.
    #[must_use]
    pub fn wants_distributed(&self) -> bool {
        self.redis_url.is_some() && !self.force_memory
    }
}
