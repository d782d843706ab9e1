//! The secret vault: AES-256-GCM sealing bound to a tenant.
//!
//! # Associated Data
//!
//! Every seal authenticates `forge-vault:v1:{key_id}:{tenant}` as associated
//! data. A record therefore opens only for the tenant it was sealed for, and
//! a record whose `key_id` has been rewritten fails even if the named key
//! exists in the ring.
//!
//! # Nonces
//!
//! A fresh 96-bit nonce is drawn from the operating system RNG inside every
//! [`seal`](SecretVault::seal) call. Callers cannot supply one, so nonce
//! reuse cannot be introduced through this API.
//!
//! # Rotation
//!
//! The key ring lives behind `RwLock<Arc<KeyRing>>`. Operations clone the
//! `Arc` and release the lock before doing any cryptography, and
//! [`rotate`](SecretVault::rotate) replaces the whole ring in one write, so a
//! seal observes either the old ring or the new one, never a mix.

use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Key, Nonce, Tag,
    aead::{AeadCore, AeadInPlace, KeyInit},
};
use parking_lot::RwLock;
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::{
    config::VaultConfig,
    error::{VaultError, VaultResult},
    key::{KeyId, KeyRing, VaultKey},
    record::{EncryptedSecretRecord, NONCE_LENGTH, TAG_LENGTH},
};

fn associated_data(key_id: KeyId, tenant: &str) -> Vec<u8> {
    format!("forge-vault:v1:{key_id}:{tenant}").into_bytes()
}

fn cipher(key: &VaultKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.material()))
}

/// Tenant-scoped authenticated encryption for stored secrets.
///
/// Cloning is cheap; clones share the key ring, so a rotation through one
/// clone is seen by all of them.
///
/// # Example
///
/// ```
/// use forge_vault::{SecretVault, VaultConfig, VaultKey};
///
/// let vault = SecretVault::new(VaultConfig::builder().active_key(VaultKey::generate()).build());
///
/// let record = vault.seal_str("sk-provider-123", "tenant-a")?;
/// assert_eq!(vault.open_str(&record, "tenant-a")?.as_str(), "sk-provider-123");
///
/// // Another tenant cannot open it.
/// assert!(vault.open_str(&record, "tenant-b").is_err());
/// # Ok::<(), forge_vault::VaultError>(())
/// ```
#[derive(Clone)]
pub struct SecretVault {
    ring: Arc<RwLock<Arc<KeyRing>>>,
}

impl std::fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.key_ring();
        f.debug_struct("SecretVault")
            .field("active_key", &ring.active().id())
            .field("keys", &ring.len())
            .finish()
    }
}

impl SecretVault {
    /// Creates a vault from validated configuration.
    #[must_use]
    pub fn new(config: VaultConfig) -> Self {
        Self::from_key_ring(config.key_ring())
    }

    /// Creates a vault from base64-encoded settings.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] if no active key is given or a
    /// key fails to decode. There is no unencrypted fallback.
    pub fn from_encoded(active: Option<&str>, retired: Option<&str>) -> VaultResult<Self> {
        VaultConfig::from_encoded(active, retired).map(Self::new)
    }

    /// Creates a vault over an existing key ring.
    #[must_use]
    pub fn from_key_ring(ring: KeyRing) -> Self {
        tracing::debug!(active_key = %ring.active().id(), keys = ring.len(), "secret vault ready");
        Self { ring: Arc::new(RwLock::new(Arc::new(ring))) }
    }

    /// Returns a snapshot of the current key ring.
    #[must_use]
    pub fn key_ring(&self) -> Arc<KeyRing> {
        Arc::clone(&self.ring.read())
    }

    /// Returns the id of the key new seals use.
    #[must_use]
    pub fn active_key_id(&self) -> KeyId {
        self.key_ring().active().id()
    }

    /// Encrypts `plaintext` for `tenant` under the active key.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EncryptionFailed`] if the cipher rejects the
    /// input, which only happens for plaintexts beyond the GCM size limit.
    #[tracing::instrument(skip(self, plaintext), fields(len = plaintext.len()))]
    pub fn seal(&self, plaintext: &[u8], tenant: &str) -> VaultResult<EncryptedSecretRecord> {
        let ring = self.key_ring();
        seal_with(ring.active(), plaintext, tenant)
    }

    /// Decrypts `record` for `tenant`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DecryptionFailed`] for every failure: unknown
    /// key id, wrong tenant, or any altered byte. No plaintext is returned
    /// on failure.
    #[tracing::instrument(skip(self, record), fields(key_id = %record.key_id))]
    pub fn open(
        &self,
        record: &EncryptedSecretRecord,
        tenant: &str,
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        let ring = self.key_ring();
        let Some(key) = ring.find(record.key_id) else {
            tracing::warn!("secret record names a key outside the ring");
            return Err(VaultError::DecryptionFailed);
        };

        let mut buffer = Zeroizing::new(record.ciphertext.clone());
        cipher(key)
            .decrypt_in_place_detached(
                Nonce::from_slice(&record.nonce),
                &associated_data(record.key_id, tenant),
                buffer.as_mut_slice(),
                Tag::from_slice(&record.tag),
            )
            .map_err(|_| {
                tracing::warn!("secret record failed authentication");
                VaultError::DecryptionFailed
            })?;
        Ok(buffer)
    }

    /// Seals a UTF-8 secret such as a provider API key.
    ///
    /// # Errors
    ///
    /// See [`seal`](Self::seal).
    pub fn seal_str(&self, secret: &str, tenant: &str) -> VaultResult<EncryptedSecretRecord> {
        self.seal(secret.as_bytes(), tenant)
    }

    /// Opens a record sealed with [`seal_str`](Self::seal_str).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DecryptionFailed`] if the record cannot be
    /// opened or the plaintext is not UTF-8.
    pub fn open_str(
        &self,
        record: &EncryptedSecretRecord,
        tenant: &str,
    ) -> VaultResult<Zeroizing<String>> {
        let mut bytes = self.open(record, tenant)?;
        let text = String::from_utf8(std::mem::take(&mut *bytes)).map_err(|e| {
            // Scrub the rejected bytes before dropping them.
            drop(Zeroizing::new(e.into_bytes()));
            VaultError::DecryptionFailed
        })?;
        Ok(Zeroizing::new(text))
    }

    /// Opens a stored secret from its compact string form.
    ///
    /// This is the read path for persisted credentials. A string that does
    /// not parse is reported exactly like one that fails authentication, so
    /// a corrupted column reveals nothing about which segment was damaged.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DecryptionFailed`] if the string is malformed,
    /// the record cannot be opened, or the plaintext is not UTF-8.
    pub fn open_compact(&self, compact: &str, tenant: &str) -> VaultResult<Zeroizing<String>> {
        let record = EncryptedSecretRecord::from_compact(compact).map_err(|error| {
            tracing::debug!(error = %error, "stored secret record did not parse");
            VaultError::DecryptionFailed
        })?;
        self.open_str(&record, tenant)
    }

    /// Makes `new_key` the active key and retires the current one.
    ///
    /// Records sealed under any key still in the ring keep opening. Returns
    /// the id of the key that was retired.
    #[tracing::instrument(skip(self, new_key), fields(new_key = %new_key.id()))]
    pub fn rotate(&self, new_key: VaultKey) -> KeyId {
        let mut guard = self.ring.write();
        let retired = guard.active().id();
        *guard = Arc::new(guard.rotated(new_key));
        tracing::info!(retired_key = %retired, keys = guard.len(), "vault key rotated");
        retired
    }

    /// Returns `true` if `record` was sealed under a key other than the
    /// active one.
    #[must_use]
    pub fn needs_reseal(&self, record: &EncryptedSecretRecord) -> bool {
        record.key_id != self.active_key_id()
    }

    /// Re-encrypts `record` under the active key with a fresh nonce.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DecryptionFailed`] if the record cannot be
    /// opened for `tenant`.
    pub fn reseal(
        &self,
        record: &EncryptedSecretRecord,
        tenant: &str,
    ) -> VaultResult<EncryptedSecretRecord> {
        let plaintext = self.open(record, tenant)?;
        self.seal(&plaintext, tenant)
    }
}

fn seal_with(key: &VaultKey, plaintext: &[u8], tenant: &str) -> VaultResult<EncryptedSecretRecord> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut buffer = plaintext.to_vec();
    let tag = cipher(key)
        .encrypt_in_place_detached(&nonce, &associated_data(key.id(), tenant), &mut buffer)
        .map_err(|_| VaultError::EncryptionFailed)?;

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    nonce_bytes.copy_from_slice(&nonce);
    let mut tag_bytes = [0u8; TAG_LENGTH];
    tag_bytes.copy_from_slice(&tag);

    Ok(EncryptedSecretRecord { key_id: key.id(), nonce: nonce_bytes, ciphertext: buffer, tag: tag_bytes })
}
