//! Key rotation across restarts and concurrent use.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{sync::Arc, thread};

use forge_vault::{EncryptedSecretRecord, SecretVault, VaultError, VaultKey};

// ============================================================================
// Restart with a rotated configuration
// ============================================================================

#[test]
fn records_survive_restart_with_previous_key_configured() {
    let old = VaultKey::generate();
    let first_boot = SecretVault::from_encoded(Some(&old.to_base64()), None).unwrap();
    let stored = first_boot.seal_str("provider-key", "tenant-a").unwrap().to_compact();

    // Operator rotates: new ENCRYPTION_KEY, old key moved to the previous list.
    let new = VaultKey::generate();
    let second_boot =
        SecretVault::from_encoded(Some(&new.to_base64()), Some(&old.to_base64())).unwrap();

    let record: EncryptedSecretRecord = stored.parse().unwrap();
    assert_eq!(second_boot.open_str(&record, "tenant-a").unwrap().as_str(), "provider-key");
    assert!(second_boot.needs_reseal(&record));
    assert_eq!(second_boot.reseal(&record, "tenant-a").unwrap().key_id, new.id());
}

#[test]
fn records_fail_once_their_key_is_dropped() {
    let old = VaultKey::generate();
    let first_boot = SecretVault::from_encoded(Some(&old.to_base64()), None).unwrap();
    let record = first_boot.seal_str("provider-key", "tenant-a").unwrap();

    let new = VaultKey::generate();
    let second_boot = SecretVault::from_encoded(Some(&new.to_base64()), None).unwrap();
    assert_eq!(second_boot.open_str(&record, "tenant-a").unwrap_err(), VaultError::DecryptionFailed);
}

#[test]
fn multiple_rotations_keep_every_generation_openable() {
    let vault = SecretVault::from_encoded(Some(&VaultKey::generate().to_base64()), None).unwrap();

    let mut records = Vec::new();
    for generation in 0..4 {
        records.push((generation, vault.seal_str(&format!("gen-{generation}"), "t").unwrap()));
        vault.rotate(VaultKey::generate());
    }

    assert_eq!(vault.key_ring().len(), 5);
    for (generation, record) in &records {
        assert_eq!(vault.open_str(record, "t").unwrap().as_str(), format!("gen-{generation}"));
    }
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn seals_during_rotation_always_open() {
    let vault = Arc::new(
        SecretVault::from_encoded(Some(&VaultKey::generate().to_base64()), None).unwrap(),
    );

    let sealers: Vec<_> = (0..4)
        .map(|worker| {
            let vault = Arc::clone(&vault);
            thread::spawn(move || {
                (0..200)
                    .map(|i| {
                        let secret = format!("{worker}-{i}");
                        (vault.seal_str(&secret, "t").unwrap(), secret)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let rotator = {
        let vault = Arc::clone(&vault);
        thread::spawn(move || {
            for _ in 0..20 {
                vault.rotate(VaultKey::generate());
            }
        })
    };

    rotator.join().unwrap();
    for sealer in sealers {
        for (record, secret) in sealer.join().unwrap() {
            assert_eq!(vault.open_str(&record, "t").unwrap().as_str(), secret);
        }
    }
}
