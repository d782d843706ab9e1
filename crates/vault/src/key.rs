//! Vault key material and the key ring.
//!
//! A [`VaultKey`] is 32 bytes of AES-256 key material held in a
//! [`Zeroizing`] buffer. Its [`KeyId`] is derived from the material itself
//! (the first 8 bytes of its SHA-256 digest), so records name the key that
//! sealed them without any separate key-id configuration.
//!
//! A [`KeyRing`] holds one active key, used for sealing, and any number of
//! retired keys that may still open older records.

use std::{fmt, str::FromStr, sync::Arc};

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

/// Length of AES-256 key material in bytes.
pub const KEY_LENGTH: usize = 32;

/// Length of a [`KeyId`] in bytes.
pub const KEY_ID_LENGTH: usize = 8;

/// Identifier of a vault key: the first 8 bytes of SHA-256 over the key.
///
/// Displays and serializes as 16 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId([u8; KEY_ID_LENGTH]);

impl KeyId {
    fn derive(material: &[u8; KEY_LENGTH]) -> Self {
        let digest = Sha256::digest(material);
        let mut id = [0u8; KEY_ID_LENGTH];
        id.copy_from_slice(&digest[..KEY_ID_LENGTH]);
        Self(id)
    }

    /// Returns the raw identifier bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_ID_LENGTH] {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({self})")
    }
}

impl FromStr for KeyId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut id = [0u8; KEY_ID_LENGTH];
        hex::decode_to_slice(s, &mut id)
            .map_err(|_| VaultError::malformed_record(format!("invalid key id {s:?}")))?;
        Ok(Self(id))
    }
}

impl TryFrom<String> for KeyId {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyId> for String {
    fn from(id: KeyId) -> Self {
        id.to_string()
    }
}

/// AES-256 key material with its derived identifier.
///
/// The material is scrubbed from memory on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct VaultKey {
    material: Zeroizing<[u8; KEY_LENGTH]>,
    id: KeyId,
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultKey").field("id", &self.id).field("material", &"[REDACTED]").finish()
    }
}

impl PartialEq for VaultKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for VaultKey {}

impl VaultKey {
    /// Wraps raw key material.
    #[must_use]
    pub fn from_bytes(material: [u8; KEY_LENGTH]) -> Self {
        let material = Zeroizing::new(material);
        let id = KeyId::derive(&material);
        Self { material, id }
    }

    /// Decodes a base64 key, accepting the standard and URL-safe alphabets
    /// with or without padding.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] if the input is not base64 or
    /// does not decode to exactly 32 bytes. The error never echoes the input.
    pub fn from_base64(encoded: &str) -> VaultResult<Self> {
        let normalized: Zeroizing<String> = Zeroizing::new(
            encoded
                .trim()
                .trim_end_matches('=')
                .chars()
                .map(|c| match c {
                    '-' => '+',
                    '_' => '/',
                    other => other,
                })
                .collect(),
        );
        let decoded = Zeroizing::new(
            STANDARD_NO_PAD
                .decode(normalized.as_bytes())
                .map_err(|_| VaultError::configuration("encryption key is not valid base64"))?,
        );

        let material: [u8; KEY_LENGTH] = decoded.as_slice().try_into().map_err(|_| {
            VaultError::configuration(format!(
                "encryption key must decode to {KEY_LENGTH} bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self::from_bytes(material))
    }

    /// Generates a fresh key from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut material = Zeroizing::new([0u8; KEY_LENGTH]);
        OsRng.fill_bytes(&mut material[..]);
        Self::from_bytes(*material)
    }

    /// Encodes the key as padded standard base64, the form operators put in
    /// `ENCRYPTION_KEY`.
    #[must_use]
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(&self.material[..]))
    }

    /// Returns the key identifier.
    #[must_use]
    pub fn id(&self) -> KeyId {
        self.id
    }

    pub(crate) fn material(&self) -> &[u8; KEY_LENGTH] {
        &self.material
    }
}

/// One active sealing key plus retired keys that can still open records.
///
/// A key ring is immutable. Rotation builds a new ring with
/// [`rotated`](KeyRing::rotated) and swaps it in whole.
#[derive(Debug, Clone)]
pub struct KeyRing {
    active: Arc<VaultKey>,
    retired: Vec<Arc<VaultKey>>,
}

impl KeyRing {
    /// Creates a ring with a single active key.
    #[must_use]
    pub fn new(active: VaultKey) -> Self {
        Self { active: Arc::new(active), retired: Vec::new() }
    }

    /// Adds retired keys. Keys equal to the active key or already present
    /// are skipped.
    #[must_use]
    pub fn with_retired(mut self, retired: impl IntoIterator<Item = VaultKey>) -> Self {
        for key in retired {
            if self.find(key.id()).is_none() {
                self.retired.push(Arc::new(key));
            }
        }
        self
    }

    /// Returns the key used for sealing.
    #[must_use]
    pub fn active(&self) -> &VaultKey {
        &self.active
    }

    /// Returns the retired keys, most recently retired first.
    pub fn retired(&self) -> impl Iterator<Item = &VaultKey> {
        self.retired.iter().map(AsRef::as_ref)
    }

    /// Looks up any key in the ring by id.
    #[must_use]
    pub fn find(&self, id: KeyId) -> Option<&VaultKey> {
        if self.active.id() == id {
            return Some(&self.active);
        }
        self.retired.iter().find(|key| key.id() == id).map(AsRef::as_ref)
    }

    /// Returns a ring with `new_active` sealing and the current active key
    /// retired in front of the older retired keys.
    ///
    /// Rotating to a key that is already retired promotes it back to active.
    /// Rotating to the current active key returns an identical ring.
    #[must_use]
    pub fn rotated(&self, new_active: VaultKey) -> Self {
        if new_active.id() == self.active.id() {
            return self.clone();
        }
        let new_id = new_active.id();
        let mut retired = Vec::with_capacity(self.retired.len() + 1);
        retired.push(Arc::clone(&self.active));
        retired.extend(self.retired.iter().filter(|key| key.id() != new_id).cloned());
        Self { active: Arc::new(new_active), retired }
    }

    /// Number of keys in the ring, active included.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.retired.len()
    }

    /// Always `false`: a ring holds at least its active key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}
