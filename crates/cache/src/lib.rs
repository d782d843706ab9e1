//! Prefixed cache abstraction for Forge.
//!
//! This crate provides the [`Cache`] facade and the [`CacheBackend`] trait
//! behind it. Token revocation and webhook replay state both live here, so
//! the cache is treated as advisory: an unreachable backend degrades to
//! misses and to an in-process fallback store, never to an error on the
//! request path.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │         Token Authority  │  External Trust Bridge         │
//! │     (revoked:{jti})      │   (webhook:{event_id})         │
//! ├───────────────────────────────────────────────────────────┤
//! │                        Cache                              │
//! │   {prefix}:{key} namespacing, fallback store, stats       │
//! ├──────────────────────────────┬────────────────────────────┤
//! │  RedisCache (distributed)    │  MemoryCache (in-process)  │
//! └──────────────────────────────┴────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use forge_cache::{Cache, CacheConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // No redis_url configured: the in-process backend is selected.
//!     let cache = Cache::connect(&CacheConfig::default()).await?;
//!
//!     cache.set("user:123", "Alice", Some(Duration::from_secs(300))).await;
//!     assert!(cache.exists("user:123").await);
//!
//!     // First writer wins.
//!     assert!(cache.set_if_absent("once", "1", Duration::from_secs(60)).await);
//!     assert!(!cache.set_if_absent("once", "2", Duration::from_secs(60)).await);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Available Backends
//!
//! | Backend | Use Case | Shared Across Processes |
//! |---------|----------|-------------------------|
//! | [`RedisCache`] | Production | Yes |
//! | [`MemoryCache`] | Development, tests, Redis outage | No |
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a switchable backend, cache factories, and
//!   assertion macros.
//! - **`failpoints`**: Compiles the `cache-primary` fail point, which makes every primary-backend
//!   call fail so the fallback paths can be exercised.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod cache;
pub mod config;
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod memory;
pub mod redis_cache;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

pub use backend::CacheBackend;
pub use cache::{Cache, CacheStats};
pub use config::{CacheConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_OPERATION_TIMEOUT, DEFAULT_PREFIX};
pub use error::{BoxError, CacheError, CacheResult};
pub use memory::MemoryCache;
pub use redis_cache::RedisCache;
