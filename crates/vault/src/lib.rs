//! Tenant-scoped secret vault for Forge.
//!
//! Provider credentials that Forge stores on behalf of a tenant are sealed
//! with AES-256-GCM before they reach the database. Each sealed value is an
//! [`EncryptedSecretRecord`] that names the key it was sealed under, so keys
//! can rotate without re-encrypting everything at once.
//!
//! # Guarantees
//!
//! - Every seal draws a fresh random nonce; callers never choose one.
//! - The tenant id is bound as associated data. A record sealed for one
//!   tenant never opens for another.
//! - Any change to a record's key id, nonce, ciphertext or tag makes
//!   [`SecretVault::open`] fail with [`VaultError::DecryptionFailed`], which
//!   carries no detail about the cause.
//! - Key material is zeroized on drop and redacted from `Debug` output.
//! - There is no pass-through mode. A vault cannot be built without a key.
//!
//! # Quick Start
//!
//! ```
//! use forge_vault::{EncryptedSecretRecord, SecretVault, VaultKey};
//!
//! let key = VaultKey::generate();
//! let vault = SecretVault::from_encoded(Some(&key.to_base64()), None)?;
//!
//! let record = vault.seal_str("sk-ant-example", "tenant-42")?;
//! let stored = record.to_compact();
//!
//! let loaded: EncryptedSecretRecord = stored.parse()?;
//! assert_eq!(vault.open_str(&loaded, "tenant-42")?.as_str(), "sk-ant-example");
//!
//! // Rotate: new seals use the new key, old records still open.
//! vault.rotate(VaultKey::generate());
//! assert!(vault.needs_reseal(&loaded));
//! let refreshed = vault.reseal(&loaded, "tenant-42")?;
//! assert!(!vault.needs_reseal(&refreshed));
//! # Ok::<(), forge_vault::VaultError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod key;
pub mod record;
pub mod vault;

pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use key::{KEY_ID_LENGTH, KEY_LENGTH, KeyId, KeyRing, VaultKey};
pub use record::{EncryptedSecretRecord, NONCE_LENGTH, TAG_LENGTH};
pub use vault::SecretVault;
