//! Security-focused authentication tests.
//!
//! These tests verify the token authority's and the trust bridge's
//! resistance to common JWT attack vectors: algorithm substitution,
//! algorithm confusion, expired/future tokens, audience confusion, replay of
//! revoked tokens, provider key rotation and malformed JWT structures.
#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use ed25519_dalek::SigningKey;
use forge_authn::{
    AuthError, Clock, ExternalKey, ExternalKeySet, ExternalTrustConfig, ManualClock, Rejection,
    TokenAuthority, TokenAuthorityConfig, TrustBridge,
};
use forge_cache::Cache;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand_core::OsRng;
use rstest::rstest;
use serde_json::json;
use zeroize::Zeroizing;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SECRET: &str = "security-suite-session-secret";
const AUDIENCE: &str = "forge.example.com";
const EPOCH: i64 = 1_700_000_000;

fn authority(cache: Cache) -> (TokenAuthority, ManualClock) {
    let clock = ManualClock::at_unix(EPOCH);
    let config = TokenAuthorityConfig::builder()
        .secret(SECRET)
        .audience(AUDIENCE)
        .build()
        .expect("authority config");
    (TokenAuthority::with_clock(config, cache, Arc::new(clock.clone())), clock)
}

fn hmac_jwt(claims: &serde_json::Value, algorithm: Algorithm, secret: &[u8]) -> String {
    jsonwebtoken::encode(&Header::new(algorithm), claims, &EncodingKey::from_secret(secret))
        .expect("Failed to encode test JWT")
}

/// Create a raw JWT string from header and payload JSON with the given signature.
fn craft_raw_jwt(header: &serde_json::Value, payload: &serde_json::Value, signature: &str) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).expect("header json"));
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).expect("payload json"));
    format!("{header_b64}.{payload_b64}.{signature}")
}

fn session_claims(now: i64) -> serde_json::Value {
    json!({"sub": "user_1", "iat": now, "exp": now + 300, "aud": AUDIENCE, "jti": "jti-1"})
}

/// Generate an Ed25519 key pair as (pkcs8_der, spki_pem).
fn generate_provider_keypair() -> (Zeroizing<Vec<u8>>, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04,
        0x20,
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    let mut spki = vec![0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00];
    spki.extend_from_slice(&signing_key.verifying_key().to_bytes());
    let pem = format!("-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n", STANDARD.encode(spki));
    (pkcs8_der, pem)
}

fn ed_jwt(pkcs8_der: &[u8], claims: &serde_json::Value) -> String {
    jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), claims, &EncodingKey::from_ed_der(pkcs8_der))
        .expect("Failed to encode test JWT")
}

fn bridge(pems: &[&str], clock: &ManualClock, authority: Option<TokenAuthority>) -> TrustBridge {
    let keys = pems.iter().map(|pem| ExternalKey::from_pem(pem).expect("pem")).collect();
    let config = ExternalTrustConfig::builder()
        .keys(ExternalKeySet::new(keys))
        .audience(AUDIENCE)
        .build()
        .expect("bridge config");
    TrustBridge::configured()
        .config(config)
        .cache(Cache::memory())
        .maybe_authority(authority)
        .clock(Arc::new(clock.clone()))
        .build()
}

// ---------------------------------------------------------------------------
// Session tokens: algorithm attacks
// ---------------------------------------------------------------------------

#[rstest]
#[case::lower("none")]
#[case::upper("NONE")]
#[case::mixed("nOnE")]
#[tokio::test]
async fn alg_none_session_token_rejected(#[case] alg: &str) {
    let (authority, _) = authority(Cache::memory());
    let token = craft_raw_jwt(&json!({"alg": alg, "typ": "JWT"}), &session_claims(EPOCH), "");
    let err = authority.verify(&token).await.expect_err("alg none must be rejected");
    assert!(matches!(err, AuthError::SignatureInvalid), "got {err:?}");
    assert_eq!(err.rejection(), Rejection::Unauthenticated);
}

#[tokio::test]
async fn session_token_signed_with_other_hmac_strength_rejected() {
    let (authority, _) = authority(Cache::memory());
    for algorithm in [Algorithm::HS384, Algorithm::HS512] {
        let token = hmac_jwt(&session_claims(EPOCH), algorithm, SECRET.as_bytes());
        assert!(matches!(authority.verify(&token).await, Err(AuthError::SignatureInvalid)));
    }
}

#[tokio::test]
async fn asymmetric_session_token_rejected() {
    let (authority, _) = authority(Cache::memory());
    let (pkcs8, _) = generate_provider_keypair();
    let token = ed_jwt(&pkcs8, &session_claims(EPOCH));
    assert!(matches!(authority.verify(&token).await, Err(AuthError::SignatureInvalid)));
}

#[tokio::test]
async fn tampered_payload_rejected() {
    let (authority, _) = authority(Cache::memory());
    let issued = authority.issue("user_1", None).expect("issue");
    let mut parts: Vec<&str> = issued.token.split('.').collect();
    let forged_payload =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json!({
            "sub": "admin", "iat": EPOCH, "exp": EPOCH + 300, "aud": AUDIENCE, "jti": "x"
        })).expect("json"));
    parts[1] = &forged_payload;
    let forged = parts.join(".");
    assert!(matches!(authority.verify(&forged).await, Err(AuthError::SignatureInvalid)));
}

// ---------------------------------------------------------------------------
// Session tokens: time and audience
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_session_rejected_at_exact_expiry() {
    let (authority, clock) = authority(Cache::memory());
    let issued = authority.issue("user_1", Some(Duration::from_secs(10))).expect("issue");
    clock.advance(Duration::from_secs(10));
    assert!(matches!(authority.verify(&issued.token).await, Err(AuthError::Expired)));
}

#[tokio::test]
async fn future_issued_session_rejected_beyond_skew() {
    let (authority, _) = authority(Cache::memory());
    let claims = json!({"sub": "u", "iat": EPOCH + 31, "exp": EPOCH + 600, "aud": AUDIENCE, "jti": "j"});
    let token = hmac_jwt(&claims, Algorithm::HS256, SECRET.as_bytes());
    assert!(matches!(authority.verify(&token).await, Err(AuthError::TokenNotYetValid)));

    let claims = json!({"sub": "u", "iat": EPOCH + 30, "exp": EPOCH + 600, "aud": AUDIENCE, "jti": "j"});
    let token = hmac_jwt(&claims, Algorithm::HS256, SECRET.as_bytes());
    assert!(authority.verify(&token).await.is_ok());
}

#[tokio::test]
async fn session_for_other_audience_rejected() {
    let (authority, _) = authority(Cache::memory());
    let claims = json!({"sub": "u", "iat": EPOCH, "exp": EPOCH + 60, "aud": "other.example", "jti": "j"});
    let token = hmac_jwt(&claims, Algorithm::HS256, SECRET.as_bytes());
    assert!(matches!(authority.verify(&token).await, Err(AuthError::AudienceMismatch { .. })));
}

// ---------------------------------------------------------------------------
// Session tokens: revocation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn revoked_session_rejected_by_every_authority_sharing_the_cache() {
    let cache = Cache::memory();
    let (first, _) = authority(cache.clone());
    let (second, _) = authority(cache);

    let issued = first.issue("user_1", None).expect("issue");
    assert!(second.verify(&issued.token).await.is_ok());

    first.revoke_token(&issued.token).await.expect("revoke");
    let err = second.verify(&issued.token).await.expect_err("revoked");
    assert!(matches!(err, AuthError::Revoked { ref jti } if *jti == issued.claims.jti));
}

#[tokio::test]
async fn forged_token_never_reaches_revocation_lookup() {
    let cache = Cache::memory();
    let (authority, _) = authority(cache.clone());
    cache.set("revoked:jti-1", "0", None).await;

    let token = hmac_jwt(&session_claims(EPOCH), Algorithm::HS256, b"attacker-secret");
    assert!(matches!(authority.verify(&token).await, Err(AuthError::SignatureInvalid)));
    assert_eq!(cache.stats().total, 0, "no cache read happened");
}

// ---------------------------------------------------------------------------
// Malformed structures
// ---------------------------------------------------------------------------

#[rstest]
#[case::empty("")]
#[case::two_parts("a.b")]
#[case::four_parts("a.b.c.d")]
#[case::garbage_header("!!!.e30.sig")]
#[case::whitespace("   ")]
#[tokio::test]
async fn malformed_token_rejected_by_both_verifiers(#[case] token: &str) {
    let (authority, clock) = authority(Cache::memory());
    let (_, pem) = generate_provider_keypair();
    let bridge = bridge(&[pem.as_str()], &clock, None);

    assert!(matches!(authority.verify(token).await, Err(AuthError::InvalidTokenFormat(_))));
    assert!(matches!(bridge.verify_external(token), Err(AuthError::InvalidTokenFormat(_))));
}

// ---------------------------------------------------------------------------
// External tokens: algorithm confusion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn external_token_signed_with_public_key_as_hmac_secret_rejected() {
    let clock = ManualClock::at_unix(EPOCH);
    let (_, pem) = generate_provider_keypair();
    let bridge = bridge(&[pem.as_str()], &clock, None);

    // The classic confusion attack: sign HS256 using the public PEM as the secret.
    let claims = json!({"sub": "user_1", "iat": EPOCH, "exp": EPOCH + 60});
    let token = hmac_jwt(&claims, Algorithm::HS256, pem.as_bytes());
    let err = bridge.verify_external(&token).expect_err("confusion must fail");
    assert!(matches!(err, AuthError::UnsupportedAlgorithm(ref msg) if msg.contains("symmetric")));
}

#[tokio::test]
async fn session_token_is_not_an_external_token() {
    let (authority, clock) = authority(Cache::memory());
    let (_, pem) = generate_provider_keypair();
    let bridge = bridge(&[pem.as_str()], &clock, Some(authority.clone()));

    let issued = authority.issue("user_1", None).expect("issue");
    assert!(matches!(bridge.verify_external(&issued.token), Err(AuthError::UnsupportedAlgorithm(_))));
    assert!(matches!(bridge.exchange(&issued.token), Err(AuthError::UnsupportedAlgorithm(_))));
}

#[tokio::test]
async fn external_token_is_not_a_session_token() {
    let (authority, clock) = authority(Cache::memory());
    let (pkcs8, pem) = generate_provider_keypair();
    let bridge = bridge(&[pem.as_str()], &clock, None);

    let external = ed_jwt(&pkcs8, &json!({"sub": "user_1", "iat": EPOCH, "exp": EPOCH + 60, "aud": AUDIENCE, "jti": "j"}));
    assert!(bridge.verify_external(&external).is_ok());
    assert!(matches!(authority.verify(&external).await, Err(AuthError::SignatureInvalid)));
}

// ---------------------------------------------------------------------------
// External tokens: rotation and exchange
// ---------------------------------------------------------------------------

#[tokio::test]
async fn provider_key_rotation_keeps_both_keys_trusted() {
    let clock = ManualClock::at_unix(EPOCH);
    let (old_private, old_pem) = generate_provider_keypair();
    let (new_private, new_pem) = generate_provider_keypair();
    let (stranger_private, _) = generate_provider_keypair();

    let bundle = format!("{old_pem}{new_pem}").replace('\n', "\\n");
    let keys = ExternalKeySet::from_pem_bundle(&bundle).expect("bundle");
    let config = ExternalTrustConfig::builder().keys(keys).build().expect("config");
    let bridge = TrustBridge::configured()
        .config(config)
        .cache(Cache::memory())
        .clock(Arc::new(clock.clone()))
        .build();

    let claims = json!({"sub": "user_1", "iat": EPOCH, "exp": EPOCH + 60});
    assert!(bridge.verify_external(&ed_jwt(&old_private, &claims)).is_ok());
    assert!(bridge.verify_external(&ed_jwt(&new_private, &claims)).is_ok());
    assert!(matches!(
        bridge.verify_external(&ed_jwt(&stranger_private, &claims)),
        Err(AuthError::SignatureInvalid)
    ));
}

#[tokio::test]
async fn exchange_mints_session_bound_to_external_subject() {
    let (authority, clock) = authority(Cache::memory());
    let (pkcs8, pem) = generate_provider_keypair();
    let bridge = bridge(&[pem.as_str()], &clock, Some(authority.clone()));

    let token = ed_jwt(&pkcs8, &json!({"sub": "user_2abc", "iat": EPOCH, "exp": EPOCH + 60, "sid": "sess_9"}));
    let federated = bridge.exchange(&token).expect("exchange");
    assert_eq!(federated.external.session_id.as_deref(), Some("sess_9"));

    let principal = authority.verify(&federated.session.token).await.expect("local session");
    assert_eq!(principal.subject, "user_2abc");
    assert_eq!(federated.session.expires_at().timestamp(), clock.now().timestamp() + 3600);
}

#[tokio::test]
async fn expired_external_token_cannot_be_exchanged() {
    let (authority, clock) = authority(Cache::memory());
    let (pkcs8, pem) = generate_provider_keypair();
    let bridge = bridge(&[pem.as_str()], &clock, Some(authority));

    let token = ed_jwt(&pkcs8, &json!({"sub": "user_1", "iat": EPOCH - 120, "exp": EPOCH - 60}));
    assert!(matches!(bridge.exchange(&token), Err(AuthError::Expired)));
}

#[test]
fn configuration_rejects_weak_inputs() {
    assert!(matches!(
        TokenAuthorityConfig::builder().secret("").audience(AUDIENCE).build(),
        Err(AuthError::Configuration(_))
    ));
    assert!(matches!(
        ExternalKey::from_pem("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----"),
        Err(AuthError::Configuration(_))
    ));
    assert_eq!(AuthError::Unconfigured.rejection(), Rejection::Misconfigured);
}
