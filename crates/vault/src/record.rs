//! Encrypted secret records and their serialized forms.
//!
//! A record carries everything needed to open it except the key and the
//! tenant: the sealing key's id, the 96-bit nonce, the ciphertext, and the
//! 128-bit GCM tag.
//!
//! Two external forms exist:
//!
//! - **serde**: a struct with `key_id` as hex and the byte fields as padded
//!   standard base64, for JSON columns and APIs
//! - **compact**: `v1.<key_id>.<nonce>.<ciphertext>.<tag>` with unpadded
//!   URL-safe base64 segments, for a single text column

use std::{fmt, str::FromStr};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::{
    error::{VaultError, VaultResult},
    key::KeyId,
};

/// Length of the AES-GCM nonce in bytes.
pub const NONCE_LENGTH: usize = 12;

/// Length of the AES-GCM authentication tag in bytes.
pub const TAG_LENGTH: usize = 16;

const COMPACT_VERSION: &str = "v1";

/// A sealed secret.
///
/// Records are opaque to everything but [`SecretVault`](crate::SecretVault).
/// Mutating any byte makes [`open`](crate::SecretVault::open) fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecretRecord {
    /// Id of the key that sealed this record.
    pub key_id: KeyId,
    /// Per-record random nonce.
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_LENGTH],
    /// Encrypted payload, same length as the plaintext.
    #[serde(with = "b64_vec")]
    pub ciphertext: Vec<u8>,
    /// GCM authentication tag.
    #[serde(with = "b64_array")]
    pub tag: [u8; TAG_LENGTH],
}

impl EncryptedSecretRecord {
    /// Renders the compact single-string form.
    #[must_use]
    pub fn to_compact(&self) -> String {
        format!(
            "{COMPACT_VERSION}.{}.{}.{}.{}",
            self.key_id,
            URL_SAFE_NO_PAD.encode(self.nonce),
            URL_SAFE_NO_PAD.encode(&self.ciphertext),
            URL_SAFE_NO_PAD.encode(self.tag),
        )
    }

    /// Parses the compact single-string form.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::MalformedRecord`] if the version, segment count,
    /// key id, or any segment's encoding or length is wrong. Parsing checks
    /// shape only; authenticity is checked by `open`.
    /// The detail in that error is for diagnostics on trusted input; reads of
    /// stored secrets go through [`SecretVault::open_compact`](crate::SecretVault::open_compact),
    /// which reports every failure as [`VaultError::DecryptionFailed`].
    pub fn from_compact(compact: &str) -> VaultResult<Self> {
        let segments: Vec<&str> = compact.trim().split('.').collect();
        let [version, key_id, nonce, ciphertext, tag] = segments.as_slice() else {
            return Err(VaultError::malformed_record(format!(
                "expected 5 segments, got {}",
                segments.len()
            )));
        };
        if *version != COMPACT_VERSION {
            return Err(VaultError::malformed_record(format!("unsupported version {version:?}")));
        }

        Ok(Self {
            key_id: key_id.parse()?,
            nonce: decode_fixed(nonce, "nonce")?,
            ciphertext: URL_SAFE_NO_PAD
                .decode(ciphertext)
                .map_err(|e| VaultError::malformed_record(format!("ciphertext: {e}")))?,
            tag: decode_fixed(tag, "tag")?,
        })
    }
}

fn decode_fixed<const N: usize>(segment: &str, field: &str) -> VaultResult<[u8; N]> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| VaultError::malformed_record(format!("{field}: {e}")))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| VaultError::malformed_record(format!("{field}: expected {N} bytes, got {len}")))
}

impl fmt::Display for EncryptedSecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_compact())
    }
}

impl FromStr for EncryptedSecretRecord {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_compact(s)
    }
}

mod b64_vec {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

mod b64_array {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(super) fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(encoded).map_err(D::Error::custom)?;
        let len = bytes.len();
        bytes.try_into().map_err(|_| D::Error::custom(format!("expected {N} bytes, got {len}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn sample() -> EncryptedSecretRecord {
        EncryptedSecretRecord {
            key_id: "0123456789abcdef".parse().unwrap(),
            nonce: [7; NONCE_LENGTH],
            ciphertext: b"opaque bytes".to_vec(),
            tag: [9; TAG_LENGTH],
        }
    }

    #[test]
    fn test_compact_form_shape() {
        let compact = sample().to_compact();
        assert!(compact.starts_with("v1.0123456789abcdef."));
        assert_eq!(compact.split('.').count(), 5);
        assert!(!compact.contains('='));
        assert_eq!(compact.parse::<EncryptedSecretRecord>().unwrap(), sample());
    }

    #[test]
    fn test_compact_form_with_empty_ciphertext() {
        let record = EncryptedSecretRecord { ciphertext: Vec::new(), ..sample() };
        let compact = record.to_compact();
        assert!(compact.contains(".."));
        assert_eq!(EncryptedSecretRecord::from_compact(&compact).unwrap(), record);
    }

    #[rstest]
    #[case::empty("")]
    #[case::wrong_version("v2.0123456789abcdef.BwcHBwcHBwcHBwcH.b3BhcXVl.CQkJCQkJCQkJCQkJCQkJCQ")]
    #[case::too_few_segments("v1.0123456789abcdef.BwcHBwcHBwcHBwcH")]
    #[case::too_many_segments("v1.0123456789abcdef.BwcHBwcHBwcHBwcH.b3BhcXVl.CQkJCQkJCQkJCQkJCQkJCQ.x")]
    #[case::bad_key_id("v1.not-hex-at-all.BwcHBwcHBwcHBwcH.b3BhcXVl.CQkJCQkJCQkJCQkJCQkJCQ")]
    #[case::short_nonce("v1.0123456789abcdef.BwcH.b3BhcXVl.CQkJCQkJCQkJCQkJCQkJCQ")]
    #[case::short_tag("v1.0123456789abcdef.BwcHBwcHBwcHBwcH.b3BhcXVl.CQkJ")]
    #[case::bad_base64("v1.0123456789abcdef.BwcHBwcHBwcHBwcH.!!!.CQkJCQkJCQkJCQkJCQkJCQ")]
    fn test_malformed_compact_forms(#[case] input: &str) {
        let err = EncryptedSecretRecord::from_compact(input).unwrap_err();
        assert!(matches!(err, VaultError::MalformedRecord(_)), "got {err:?}");
    }

    #[test]
    fn test_serde_json_form() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["key_id"], "0123456789abcdef");
        assert_eq!(json["nonce"], "BwcHBwcHBwcHBwcH");
        assert_eq!(json["ciphertext"], "b3BhcXVlIGJ5dGVz");

        let restored: EncryptedSecretRecord = serde_json::from_value(json).unwrap();
        assert_eq!(restored, sample());
    }

    #[test]
    fn test_serde_rejects_wrong_nonce_length() {
        let json = serde_json::json!({
            "key_id": "0123456789abcdef",
            "nonce": "BwcH",
            "ciphertext": "",
            "tag": "CQkJCQkJCQkJCQkJCQkJCQ==",
        });
        assert!(serde_json::from_value::<EncryptedSecretRecord>(json).is_err());
    }
}
