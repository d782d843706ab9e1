//! Vault configuration.

use crate::{
    error::{VaultError, VaultResult},
    key::{KeyRing, VaultKey},
};

/// Key material for [`SecretVault`](crate::SecretVault).
///
/// There is deliberately no way to build a `VaultConfig` without an active
/// key, so a vault can never run unencrypted.
///
/// # Example
///
/// ```
/// use forge_vault::{VaultConfig, VaultKey};
///
/// let config = VaultConfig::builder()
///     .active_key(VaultKey::generate())
///     .retired_keys(vec![VaultKey::generate()])
///     .build();
/// assert_eq!(config.key_ring().len(), 2);
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct VaultConfig {
    /// Key used for every new seal.
    active_key: VaultKey,

    /// Keys that may still open records sealed before a rotation.
    #[builder(default)]
    retired_keys: Vec<VaultKey>,
}

impl VaultConfig {
    /// Builds a configuration from base64-encoded settings.
    ///
    /// `active` is the current key. `retired` is an optional comma-separated
    /// list of previous keys; blank entries are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] if `active` is absent or blank,
    /// or if any key fails to decode.
    pub fn from_encoded(active: Option<&str>, retired: Option<&str>) -> VaultResult<Self> {
        let active = active
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| VaultError::configuration("no encryption key configured"))?;
        let active_key = VaultKey::from_base64(active)?;

        let retired_keys = retired
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .enumerate()
            .map(|(index, value)| {
                VaultKey::from_base64(value).map_err(|e| {
                    VaultError::configuration(format!("previous key #{}: {e}", index + 1))
                })
            })
            .collect::<VaultResult<Vec<_>>>()?;

        Ok(Self { active_key, retired_keys })
    }

    /// Returns the active key.
    #[must_use]
    pub fn active_key(&self) -> &VaultKey {
        &self.active_key
    }

    /// Returns the retired keys.
    #[must_use]
    pub fn retired_keys(&self) -> &[VaultKey] {
        &self.retired_keys
    }

    /// Assembles the key ring described by this configuration.
    #[must_use]
    pub fn key_ring(&self) -> KeyRing {
        KeyRing::new(self.active_key.clone()).with_retired(self.retired_keys.iter().cloned())
    }
}
