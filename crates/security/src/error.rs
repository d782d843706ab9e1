//! Startup error types.

use forge_authn::AuthError;
use forge_cache::CacheError;
use forge_vault::VaultError;
use thiserror::Error;

/// Result type alias for startup operations.
pub type Result<T> = std::result::Result<T, SecurityError>;

/// Errors raised while loading settings or assembling the security core.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SecurityError {
    /// A setting is missing, unparseable or too weak.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The cache could not be configured.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The vault rejected its key material.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// The token authority or trust bridge rejected its configuration.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl SecurityError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
