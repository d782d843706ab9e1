//! Shared test utilities for authentication testing.
//!
//! Helpers for building a token authority on a pinned clock, generating
//! Ed25519 provider keys, crafting raw JWT strings (for attack testing),
//! signing webhook deliveries and recording what handlers receive. It is
//! feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! forge-authn = { path = "../authn", features = ["testutil"] }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use ed25519_dalek::SigningKey;
use forge_cache::Cache;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::{
    clock::ManualClock,
    external::ExternalKey,
    identity::{ExternalUser, IdentitySink, UserEventKind},
    token::{IssuedToken, TokenAuthority, TokenAuthorityConfig},
    webhook::{
        HandlerError, WebhookEvent, WebhookHandler, WebhookHeaders, WebhookSecret, WebhookVerifier,
    },
};

/// Session signing secret used by [`test_authority`].
pub const TEST_SECRET: &str = "forge-test-session-secret-0123456789";

/// Audience used by [`test_authority`].
pub const TEST_AUDIENCE: &str = "forge.test";

/// Instant the test clocks start at (2023-11-14T22:13:20Z).
pub const TEST_EPOCH: i64 = 1_700_000_000;

/// Creates a token authority on a [`ManualClock`] stopped at [`TEST_EPOCH`].
///
/// Default TTL is one hour and clock skew 30 seconds.
///
/// # Panics
///
/// Panics if the fixed configuration is rejected.
pub fn test_authority(cache: Cache) -> (TokenAuthority, ManualClock) {
    let clock = ManualClock::at_unix(TEST_EPOCH);
    let config = TokenAuthorityConfig::builder()
        .secret(TEST_SECRET)
        .audience(TEST_AUDIENCE)
        .build()
        .expect("test authority config");
    (TokenAuthority::with_clock(config, cache, Arc::new(clock.clone())), clock)
}

/// An Ed25519 key pair standing in for the identity provider.
pub struct TestKeypair {
    pkcs8_der: Zeroizing<Vec<u8>>,
    public_key: [u8; 32],
}

impl TestKeypair {
    /// Generates a fresh key pair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
        let mut pkcs8_der = Zeroizing::new(vec![
            0x30, 0x2e, // SEQUENCE, 46 bytes
            0x02, 0x01, 0x00, // INTEGER version 0
            0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
            0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
            0x04, 0x22, // OCTET STRING, 34 bytes
            0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
        ]);
        pkcs8_der.extend_from_slice(&*private_bytes);
        Self { pkcs8_der, public_key: signing_key.verifying_key().to_bytes() }
    }

    /// The public key as an SPKI PEM block.
    pub fn public_pem(&self) -> String {
        let mut spki = vec![
            0x30, 0x2a, // SEQUENCE, 42 bytes
            0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
            0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
            0x03, 0x21, 0x00, // BIT STRING, 33 bytes, no unused bits
        ];
        spki.extend_from_slice(&self.public_key);
        format!("-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n", STANDARD.encode(spki))
    }

    /// The public key as a bridge key.
    ///
    /// # Panics
    ///
    /// Panics if the generated PEM does not parse.
    pub fn external_key(&self) -> ExternalKey {
        ExternalKey::from_pem(&self.public_pem()).expect("test public key")
    }

    /// Signs `claims` with EdDSA, optionally setting `kid`.
    ///
    /// # Panics
    ///
    /// Panics if JWT encoding fails.
    pub fn sign(&self, kid: Option<&str>, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = kid.map(str::to_owned);
        jsonwebtoken::encode(&header, claims, &EncodingKey::from_ed_der(&self.pkcs8_der))
            .expect("Failed to encode test JWT")
    }
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. This is useful for testing rejection of
/// malformed or attack JWTs (e.g., `alg: "none"`, algorithm confusion).
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// The webhook secret `whsec_dGVzdC13ZWJob29rLXNlY3JldA==` ("test-webhook-secret").
pub fn test_webhook_secret() -> WebhookSecret {
    WebhookSecret::from_bytes(b"test-webhook-secret".to_vec())
}

/// Signs a delivery the way the provider does.
///
/// # Panics
///
/// Panics if signing fails.
pub fn signed_headers(
    secret: &WebhookSecret,
    id: &str,
    timestamp: i64,
    body: &[u8],
) -> WebhookHeaders {
    let verifier = WebhookVerifier::new(secret.clone(), std::time::Duration::from_secs(1));
    let signature = verifier.sign(id, timestamp, body).expect("webhook signature");
    WebhookHeaders::new(id, timestamp.to_string(), signature)
}

/// A webhook handler that records every event, optionally failing.
pub struct RecordingHandler {
    name: String,
    fail: bool,
    events: Mutex<Vec<WebhookEvent>>,
}

impl RecordingHandler {
    /// A handler that accepts every event.
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned(), fail: false, events: Mutex::new(Vec::new()) }
    }

    /// A handler that records then fails every event.
    pub fn failing(name: &str) -> Self {
        Self { fail: true, ..Self::new(name) }
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<WebhookEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl WebhookHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        self.events.lock().push(event.clone());
        if self.fail { Err(HandlerError::new("recording handler told to fail")) } else { Ok(()) }
    }
}

/// An identity sink that records what it is given.
#[derive(Default)]
pub struct RecordingSink {
    minted: Mutex<Vec<(UserEventKind, ExternalUser, IssuedToken)>>,
    deleted: Mutex<Vec<String>>,
}

impl RecordingSink {
    /// Sessions minted so far.
    pub fn minted(&self) -> Vec<(UserEventKind, ExternalUser, IssuedToken)> {
        self.minted.lock().clone()
    }

    /// Ids of deleted users so far.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl IdentitySink for RecordingSink {
    async fn session_minted(
        &self,
        kind: UserEventKind,
        user: &ExternalUser,
        session: &IssuedToken,
    ) -> Result<(), HandlerError> {
        self.minted.lock().push((kind, user.clone(), session.clone()));
        Ok(())
    }

    async fn user_deleted(&self, user: &ExternalUser) -> Result<(), HandlerError> {
        self.deleted.lock().push(user.id.clone());
        Ok(())
    }
}

/// Asserts that a result is an `Err` matching the given pattern.
///
/// The expression is evaluated once. On failure, prints the expected
/// pattern and the actual result for debugging.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use forge_authn::{AuthError, assert_rejected};
///
/// let result: Result<(), AuthError> = Err(AuthError::Expired);
/// assert_rejected!(result, AuthError::Expired);
/// ```
#[macro_export]
macro_rules! assert_rejected {
    ($result:expr, $pattern:pat $(,)?) => {{
        let result = $result;
        assert!(
            matches!(result, Err($pattern)),
            "expected Err({}), got: {:?}",
            stringify!($pattern),
            result,
        );
    }};
}
