//! Cache error types and result alias.
//!
//! Every backend maps its internal failures onto [`CacheError`]. The
//! [`Cache`](crate::Cache) facade absorbs these on the read path (a failed
//! read is a miss), so callers mostly see them from configuration and from
//! direct backend use in tests.
//!
//! # Example
//!
//! ```
//! use forge_cache::{CacheError, CacheResult};
//!
//! fn lookup(_key: &str) -> CacheResult<Vec<u8>> {
//!     Err(CacheError::unavailable("connection refused"))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur during cache operations.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The backend could not be reached or rejected the command.
    #[error("Cache unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// The underlying client error, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// The backend did not answer within the configured operation timeout.
    #[error("Cache operation timed out")]
    Timeout,

    /// A value could not be encoded for storage or decoded after retrieval.
    #[error("Cache serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The cache configuration is invalid.
    #[error("Invalid cache configuration: {message}")]
    Config {
        /// What was wrong with the configuration.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `Unavailable` error with the given message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    /// Creates a new `Unavailable` error with a message and source error.
    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Returns `true` for failures that a later attempt may not hit.
    ///
    /// The facade uses this to decide whether the in-process fallback store
    /// should stand in for the primary backend.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout)
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.kind() == redis::ErrorKind::TypeError {
            return Self::serialization_with_source("unexpected reply type", err);
        }
        Self::unavailable_with_source(err.category().to_owned(), err)
    }
}

impl From<tokio::time::error::Elapsed> for CacheError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CacheError::unavailable("connection refused").to_string(),
            "Cache unavailable: connection refused"
        );
        assert_eq!(CacheError::timeout().to_string(), "Cache operation timed out");
        assert_eq!(
            CacheError::config("prefix is empty").to_string(),
            "Invalid cache configuration: prefix is empty"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(CacheError::unavailable("down").is_transient());
        assert!(CacheError::timeout().is_transient());
        assert!(!CacheError::config("bad").is_transient());
    }

    #[test]
    fn test_source_chain_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = CacheError::unavailable_with_source("connect failed", io);
        let source = err.source().expect("source must be preserved");
        assert_eq!(source.to_string(), "refused");
    }
}
