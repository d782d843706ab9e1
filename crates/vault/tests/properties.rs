//! Property tests for sealing and opening.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::LazyLock;

use forge_vault::{EncryptedSecretRecord, SecretVault, VaultConfig, VaultError, VaultKey};
use proptest::prelude::*;

static VAULT: LazyLock<SecretVault> = LazyLock::new(|| {
    SecretVault::new(VaultConfig::builder().active_key(VaultKey::generate()).build())
});

fn tenant() -> impl Strategy<Value = String> {
    "[a-z0-9-]{1,24}"
}

/// Which field of a record to flip a bit in.
#[derive(Debug, Clone, Copy)]
enum Field {
    Nonce,
    Ciphertext,
    Tag,
}

fn tamper(record: &EncryptedSecretRecord, field: Field, index: usize, bit: u8) -> EncryptedSecretRecord {
    let mut record = record.clone();
    let mask = 1u8 << (bit % 8);
    match field {
        Field::Nonce => record.nonce[index % record.nonce.len()] ^= mask,
        Field::Tag => record.tag[index % record.tag.len()] ^= mask,
        Field::Ciphertext => {
            let len = record.ciphertext.len();
            record.ciphertext[index % len] ^= mask;
        },
    }
    record
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn sealed_bytes_open_to_the_original(
        plaintext in prop::collection::vec(any::<u8>(), 0..512),
        tenant in tenant(),
    ) {
        let record = VAULT.seal(&plaintext, &tenant).unwrap();
        prop_assert_eq!(record.ciphertext.len(), plaintext.len());
        let opened = VAULT.open(&record, &tenant).unwrap();
        prop_assert_eq!(opened.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn compact_form_preserves_openability(
        secret in "\\PC{0,128}",
        tenant in tenant(),
    ) {
        let record = VAULT.seal_str(&secret, &tenant).unwrap();
        let restored: EncryptedSecretRecord = record.to_compact().parse().unwrap();
        let opened = VAULT.open_str(&restored, &tenant).unwrap();
        prop_assert_eq!(opened.as_str(), secret.as_str());
    }

    #[test]
    fn any_flipped_bit_fails_to_open(
        plaintext in prop::collection::vec(any::<u8>(), 1..128),
        field in prop_oneof![Just(Field::Nonce), Just(Field::Ciphertext), Just(Field::Tag)],
        index in any::<usize>(),
        bit in any::<u8>(),
    ) {
        let record = VAULT.seal(&plaintext, "tenant").unwrap();
        let tampered = tamper(&record, field, index, bit);
        prop_assert_eq!(VAULT.open(&tampered, "tenant").unwrap_err(), VaultError::DecryptionFailed);
    }

    #[test]
    fn other_tenants_cannot_open(
        plaintext in prop::collection::vec(any::<u8>(), 0..64),
        owner in tenant(),
        intruder in tenant(),
    ) {
        prop_assume!(owner != intruder);
        let record = VAULT.seal(&plaintext, &owner).unwrap();
        prop_assert_eq!(VAULT.open(&record, &intruder).unwrap_err(), VaultError::DecryptionFailed);
    }
}
