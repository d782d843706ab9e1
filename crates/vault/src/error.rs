//! Vault error types.
//!
//! Every failure to open a record collapses into the unit variant
//! [`VaultError::DecryptionFailed`]. Callers learn that a record could not be
//! opened, never why, so the vault cannot be used as a padding or key oracle.

use thiserror::Error;

/// Result type alias for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors produced by the secret vault.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum VaultError {
    /// Missing or unusable key material at startup.
    #[error("Vault configuration error: {0}")]
    Configuration(String),

    /// A record could not be authenticated and opened.
    #[error("Decryption failed")]
    DecryptionFailed,

    /// The cipher refused to seal the plaintext.
    #[error("Encryption failed")]
    EncryptionFailed,

    /// The compact string form of a record could not be parsed.
    #[error("Malformed secret record: {0}")]
    MalformedRecord(String),
}

impl VaultError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a new `MalformedRecord` error.
    #[must_use]
    pub fn malformed_record(message: impl Into<String>) -> Self {
        Self::MalformedRecord(message.into())
    }
}
