//! Signed webhook ingestion.
//!
//! The identity provider delivers user lifecycle events as Svix-signed
//! webhooks. A delivery is accepted only if, in this order:
//!
//! 1. one of its `v1` signatures is an HMAC-SHA256 of `{id}.{timestamp}.{body}`
//!    under the shared secret ([`AuthError::SignatureInvalid`])
//! 2. its timestamp is within the tolerance of the local clock
//!    ([`AuthError::WebhookTimestampInvalid`])
//! 3. the body is a JSON event with a `type` ([`AuthError::MalformedPayload`])
//! 4. its id has not been seen inside the replay window
//!    ([`AuthError::ReplayDetected`])
//!
//! Accepted events are dispatched to every registered [`WebhookHandler`].
//! Handler failures are collected in the [`WebhookDelivery`] and never turn
//! an authentic delivery into a rejection.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::{
    error::{AuthError, Result},
    external::TrustBridge,
};

/// Header carrying the delivery id.
pub const WEBHOOK_ID_HEADER: &str = "svix-id";

/// Header carrying the delivery timestamp (seconds since epoch).
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "svix-timestamp";

/// Header carrying space-separated `v1,<base64>` signatures.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "svix-signature";

/// Cache key prefix for replay guards.
pub const REPLAY_PREFIX: &str = "webhook:";

const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1";

type HmacSha256 = Hmac<Sha256>;

/// Shared webhook signing secret.
#[derive(Clone)]
pub struct WebhookSecret(Zeroizing<Vec<u8>>);

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookSecret([REDACTED])")
    }
}

impl WebhookSecret {
    /// Wraps raw secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Parses a provider secret such as `whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw`.
    ///
    /// The `whsec_` prefix is optional; the rest must be standard base64.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the secret is empty or not
    /// base64.
    pub fn parse(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let body = encoded.strip_prefix(SECRET_PREFIX).unwrap_or(encoded);
        let bytes = Zeroizing::new(
            STANDARD
                .decode(body)
                .map_err(|_| AuthError::configuration("webhook secret is not valid base64"))?,
        );
        if bytes.is_empty() {
            return Err(AuthError::configuration("webhook secret is empty"));
        }
        Ok(Self(bytes))
    }
}

/// The signature headers of one delivery.
///
/// Missing headers are kept as `None` and rejected during verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookHeaders {
    /// `svix-id`.
    pub id: Option<String>,
    /// `svix-timestamp`.
    pub timestamp: Option<String>,
    /// `svix-signature`.
    pub signature: Option<String>,
}

impl WebhookHeaders {
    /// Creates headers from present values.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        timestamp: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            timestamp: Some(timestamp.into()),
            signature: Some(signature.into()),
        }
    }

    /// Reads the headers through a lookup function, such as a closure over
    /// an HTTP header map.
    pub fn from_lookup<'a>(lookup: impl Fn(&str) -> Option<&'a str>) -> Self {
        let read = |name| lookup(name).map(str::to_owned);
        Self {
            id: read(WEBHOOK_ID_HEADER),
            timestamp: read(WEBHOOK_TIMESTAMP_HEADER),
            signature: read(WEBHOOK_SIGNATURE_HEADER),
        }
    }
}

/// An authentic delivery's id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedDelivery {
    /// Delivery id.
    pub id: String,
    /// Delivery timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Verifies (and, for tests and tooling, produces) webhook signatures.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: WebhookSecret,
    tolerance: std::time::Duration,
}

impl WebhookVerifier {
    /// Creates a verifier accepting timestamps within `tolerance` of now.
    #[must_use]
    pub fn new(secret: WebhookSecret, tolerance: std::time::Duration) -> Self {
        Self { secret, tolerance }
    }

    /// Checks signature then timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SignatureInvalid`] if a header is missing or no
    /// signature matches, and [`AuthError::WebhookTimestampInvalid`] if the
    /// timestamp is unparseable or outside the tolerance.
    pub fn verify(
        &self,
        body: &[u8],
        headers: &WebhookHeaders,
        now: DateTime<Utc>,
    ) -> Result<VerifiedDelivery> {
        let (Some(id), Some(timestamp), Some(signatures)) =
            (headers.id.as_deref(), headers.timestamp.as_deref(), headers.signature.as_deref())
        else {
            return Err(AuthError::SignatureInvalid);
        };
        if id.is_empty() {
            return Err(AuthError::SignatureInvalid);
        }

        let expected = self.mac(id, timestamp, body)?;
        let matched = signatures
            .split_whitespace()
            .filter_map(|candidate| candidate.split_once(','))
            .filter(|(version, _)| *version == SIGNATURE_VERSION)
            .filter_map(|(_, signature)| STANDARD.decode(signature).ok())
            .fold(false, |matched, candidate| {
                matched | bool::from(expected.as_slice().ct_eq(candidate.as_slice()))
            });
        if !matched {
            return Err(AuthError::SignatureInvalid);
        }

        let sent = timestamp
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or(AuthError::WebhookTimestampInvalid)?;
        let drift = (now - sent).abs().to_std().map_err(|_| AuthError::WebhookTimestampInvalid)?;
        if drift > self.tolerance {
            return Err(AuthError::WebhookTimestampInvalid);
        }

        Ok(VerifiedDelivery { id: id.to_owned(), timestamp: sent })
    }

    /// Produces a `v1,<base64>` signature for a delivery.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the MAC cannot be keyed.
    pub fn sign(&self, id: &str, timestamp: i64, body: &[u8]) -> Result<String> {
        let mac = self.mac(id, &timestamp.to_string(), body)?;
        Ok(format!("{SIGNATURE_VERSION},{}", STANDARD.encode(mac)))
    }

    fn mac(&self, id: &str, timestamp: &str, body: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret.0)
            .map_err(|_| AuthError::configuration("webhook secret cannot key HMAC-SHA256"))?;
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// A verified webhook event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookEvent {
    /// Delivery id (`svix-id`).
    pub id: String,
    /// Event type, e.g. `user.created`.
    pub event_type: String,
    /// Delivery timestamp.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub data: serde_json::Value,
}

#[derive(Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl WebhookEvent {
    /// Parses a verified body.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedPayload`] if the body is not a JSON
    /// object with a non-empty `type`.
    pub fn parse(delivery: VerifiedDelivery, body: &[u8]) -> Result<Self> {
        let envelope: EventEnvelope = serde_json::from_slice(body)
            .map_err(|e| AuthError::malformed_payload(format!("webhook body: {e}")))?;
        if envelope.event_type.is_empty() {
            return Err(AuthError::malformed_payload("webhook event type is empty"));
        }
        Ok(Self {
            id: delivery.id,
            event_type: envelope.event_type,
            timestamp: delivery.timestamp,
            data: envelope.data,
        })
    }
}

/// Boxed error for handler failure sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A handler's failure to process an event.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl HandlerError {
    /// Creates an error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), source: None }
    }

    /// Creates an error with a message and an underlying cause.
    #[must_use]
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self { message: message.into(), source: Some(source.into()) }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Consumer of verified webhook events.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    /// Name used in logs and outcomes.
    fn name(&self) -> &str;

    /// Processes one event. Unknown event types should be ignored.
    async fn handle(&self, event: &WebhookEvent) -> std::result::Result<(), HandlerError>;
}

/// One handler's result for a delivery.
#[derive(Debug)]
pub struct HandlerOutcome {
    /// Handler name.
    pub handler: String,
    /// What the handler returned.
    pub result: std::result::Result<(), HandlerError>,
}

/// The result of an accepted delivery.
#[derive(Debug)]
pub struct WebhookDelivery {
    /// The verified event.
    pub event: WebhookEvent,
    /// Per-handler results, in registration order.
    pub outcomes: Vec<HandlerOutcome>,
}

impl WebhookDelivery {
    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &HandlerOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }

    /// Returns `true` if every handler succeeded.
    #[must_use]
    pub fn is_fully_handled(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl TrustBridge {
    /// Verifies a webhook delivery and dispatches it to the handlers.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Unconfigured`] without a bridge or webhook secret
    /// - [`AuthError::SignatureInvalid`] for missing headers or a bad signature
    /// - [`AuthError::WebhookTimestampInvalid`] outside the tolerance
    /// - [`AuthError::MalformedPayload`] for a body that is not an event
    /// - [`AuthError::ReplayDetected`] for an id seen inside the replay window
    #[tracing::instrument(skip(self, body, headers), fields(webhook_id = headers.id.as_deref().unwrap_or_default()))]
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        headers: &WebhookHeaders,
    ) -> Result<WebhookDelivery> {
        let bridge = self.bridge()?;
        let verifier = bridge.webhook.as_ref().ok_or(AuthError::Unconfigured)?;
        let now = bridge.clock.now();

        let delivery = verifier.verify(body, headers, now).inspect_err(|e| {
            tracing::warn!(error = %e, "webhook rejected");
        })?;
        let event = WebhookEvent::parse(delivery, body).inspect_err(|e| {
            tracing::warn!(error = %e, "webhook payload rejected");
        })?;

        let guard = format!("{REPLAY_PREFIX}{}", event.id);
        let first_delivery = bridge
            .cache
            .set_if_absent(&guard, now.timestamp().to_string(), bridge.config.replay_window())
            .await;
        if !first_delivery {
            tracing::warn!(event_type = %event.event_type, "webhook replay rejected");
            return Err(AuthError::replay_detected(event.id));
        }

        tracing::info!(event_type = %event.event_type, "webhook accepted");
        let outcomes = dispatch(&bridge.handlers, &event).await;
        Ok(WebhookDelivery { event, outcomes })
    }
}

async fn dispatch(handlers: &[Arc<dyn WebhookHandler>], event: &WebhookEvent) -> Vec<HandlerOutcome> {
    let mut outcomes = Vec::with_capacity(handlers.len());
    for handler in handlers {
        let result = run_handler(handler.as_ref(), event).await;
        if let Err(e) = &result {
            tracing::warn!(handler = handler.name(), error = %e, "webhook handler failed");
        }
        outcomes.push(HandlerOutcome { handler: handler.name().to_owned(), result });
    }
    outcomes
}

async fn run_handler(
    handler: &dyn WebhookHandler,
    event: &WebhookEvent,
) -> std::result::Result<(), HandlerError> {
    fail::fail_point!("webhook-handler", |_| Err(HandlerError::new("injected handler failure")));
    handler.handle(event).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use forge_cache::Cache;
    use rstest::rstest;

    use super::*;
    use crate::{
        assert_rejected,
        clock::ManualClock,
        external::ExternalTrustConfig,
        testutil::{RecordingHandler, TEST_EPOCH, signed_headers, test_webhook_secret},
    };

    const BODY: &[u8] = br#"{"type":"user.created","data":{"id":"user_1"}}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(test_webhook_secret(), Duration::from_secs(300))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn bridge(
        clock: &ManualClock,
        handlers: Vec<Arc<dyn WebhookHandler>>,
    ) -> TrustBridge {
        let config =
            ExternalTrustConfig::builder().webhook_secret(test_webhook_secret()).build().unwrap();
        TrustBridge::configured()
            .config(config)
            .cache(Cache::memory())
            .handlers(handlers)
            .clock(Arc::new(clock.clone()))
            .build()
    }

    // ========================================================================
    // Secrets
    // ========================================================================

    #[test]
    fn test_secret_parse_strips_prefix() {
        let with = WebhookSecret::parse("whsec_c2VjcmV0").unwrap();
        let without = WebhookSecret::parse("c2VjcmV0").unwrap();
        assert_eq!(*with.0, b"secret".to_vec());
        assert_eq!(*without.0, b"secret".to_vec());
    }

    #[rstest]
    #[case::empty("")]
    #[case::prefix_only("whsec_")]
    #[case::not_base64("whsec_!!!")]
    fn test_secret_parse_rejects(#[case] encoded: &str) {
        assert!(matches!(WebhookSecret::parse(encoded), Err(AuthError::Configuration(_))));
    }

    #[test]
    fn test_secret_debug_redacted() {
        assert_eq!(format!("{:?}", test_webhook_secret()), "WebhookSecret([REDACTED])");
    }

    // ========================================================================
    // Signatures and timestamps
    // ========================================================================

    #[test]
    fn test_verify_accepts_signed_delivery() {
        let headers = signed_headers(&test_webhook_secret(), "msg_1", TEST_EPOCH, BODY);
        let delivery = verifier().verify(BODY, &headers, at(TEST_EPOCH)).unwrap();
        assert_eq!(delivery.id, "msg_1");
        assert_eq!(delivery.timestamp, at(TEST_EPOCH));
    }

    #[test]
    fn test_verify_accepts_any_matching_candidate() {
        let mut headers = signed_headers(&test_webhook_secret(), "msg_1", TEST_EPOCH, BODY);
        let good = headers.signature.take().unwrap();
        headers.signature = Some(format!("v1,AAAA v2,ignored {good}"));
        assert!(verifier().verify(BODY, &headers, at(TEST_EPOCH)).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let headers = signed_headers(&test_webhook_secret(), "msg_1", TEST_EPOCH, BODY);
        let tampered = br#"{"type":"user.deleted","data":{"id":"user_1"}}"#;
        assert_rejected!(verifier().verify(tampered, &headers, at(TEST_EPOCH)), AuthError::SignatureInvalid);
    }

    #[test]
    fn test_verify_rejects_other_secret() {
        let other = WebhookSecret::from_bytes(b"other".to_vec());
        let headers = signed_headers(&other, "msg_1", TEST_EPOCH, BODY);
        assert_rejected!(verifier().verify(BODY, &headers, at(TEST_EPOCH)), AuthError::SignatureInvalid);
    }

    #[rstest]
    #[case::no_id(WebhookHeaders { id: None, ..signed_headers(&test_webhook_secret(), "m", TEST_EPOCH, BODY) })]
    #[case::no_timestamp(WebhookHeaders { timestamp: None, ..signed_headers(&test_webhook_secret(), "m", TEST_EPOCH, BODY) })]
    #[case::no_signature(WebhookHeaders { signature: None, ..signed_headers(&test_webhook_secret(), "m", TEST_EPOCH, BODY) })]
    fn test_verify_rejects_missing_headers(#[case] headers: WebhookHeaders) {
        assert_rejected!(verifier().verify(BODY, &headers, at(TEST_EPOCH)), AuthError::SignatureInvalid);
    }

    #[rstest]
    #[case::late(301)]
    #[case::early(-301)]
    fn test_verify_rejects_stale_timestamp(#[case] offset: i64) {
        let headers = signed_headers(&test_webhook_secret(), "msg_1", TEST_EPOCH, BODY);
        assert_rejected!(
            verifier().verify(BODY, &headers, at(TEST_EPOCH + offset)),
            AuthError::WebhookTimestampInvalid
        );
    }

    #[rstest]
    #[case::late(300)]
    #[case::early(-300)]
    fn test_verify_tolerance_is_inclusive(#[case] offset: i64) {
        let headers = signed_headers(&test_webhook_secret(), "msg_1", TEST_EPOCH, BODY);
        assert!(verifier().verify(BODY, &headers, at(TEST_EPOCH + offset)).is_ok());
    }

    #[test]
    fn test_bad_signature_reported_before_stale_timestamp() {
        let other = WebhookSecret::from_bytes(b"other".to_vec());
        let headers = signed_headers(&other, "msg_1", TEST_EPOCH, BODY);
        assert_rejected!(
            verifier().verify(BODY, &headers, at(TEST_EPOCH + 3_600)),
            AuthError::SignatureInvalid
        );
    }

    #[test]
    fn test_signed_non_numeric_timestamp() {
        let verifier = verifier();
        let mac = verifier.mac("msg_1", "soon", BODY).unwrap();
        let headers =
            WebhookHeaders::new("msg_1", "soon", format!("v1,{}", STANDARD.encode(mac)));
        assert_rejected!(verifier.verify(BODY, &headers, at(TEST_EPOCH)), AuthError::WebhookTimestampInvalid);
    }

    #[test]
    fn test_headers_from_lookup() {
        let headers = WebhookHeaders::from_lookup(|name| match name {
            WEBHOOK_ID_HEADER => Some("msg_1"),
            WEBHOOK_TIMESTAMP_HEADER => Some("1700000000"),
            _ => None,
        });
        assert_eq!(headers.id.as_deref(), Some("msg_1"));
        assert_eq!(headers.timestamp.as_deref(), Some("1700000000"));
        assert_eq!(headers.signature, None);
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    #[tokio::test]
    async fn test_delivery_dispatched_once() {
        let clock = ManualClock::at_unix(TEST_EPOCH);
        let recorder = Arc::new(RecordingHandler::new("recorder"));
        let bridge = bridge(&clock, vec![recorder.clone()]);
        let headers = signed_headers(&test_webhook_secret(), "msg_1", TEST_EPOCH, BODY);

        let delivery = bridge.handle_webhook(BODY, &headers).await.unwrap();
        assert_eq!(delivery.event.event_type, "user.created");
        assert_eq!(delivery.event.data["id"], "user_1");
        assert!(delivery.is_fully_handled());

        assert_rejected!(
            bridge.handle_webhook(BODY, &headers).await,
            AuthError::ReplayDetected { .. }
        );
        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_delivery_reaches_no_handler() {
        let clock = ManualClock::at_unix(TEST_EPOCH);
        let recorder = Arc::new(RecordingHandler::new("recorder"));
        let bridge = bridge(&clock, vec![recorder.clone()]);
        let mut headers = signed_headers(&test_webhook_secret(), "msg_1", TEST_EPOCH, BODY);
        headers.signature = Some("v1,AAAA".into());

        assert_rejected!(bridge.handle_webhook(BODY, &headers).await, AuthError::SignatureInvalid);
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_signature_does_not_consume_id() {
        let clock = ManualClock::at_unix(TEST_EPOCH);
        let bridge = bridge(&clock, vec![]);
        let good = signed_headers(&test_webhook_secret(), "msg_1", TEST_EPOCH, BODY);
        let forged = WebhookHeaders { signature: Some("v1,AAAA".into()), ..good.clone() };

        assert_rejected!(bridge.handle_webhook(BODY, &forged).await, AuthError::SignatureInvalid);
        assert!(bridge.handle_webhook(BODY, &good).await.is_ok());
    }

    #[rstest]
    #[case::not_json(b"not json".as_slice())]
    #[case::no_type(br#"{"data":{}}"#.as_slice())]
    #[case::empty_type(br#"{"type":""}"#.as_slice())]
    #[tokio::test]
    async fn test_malformed_payload(#[case] body: &[u8]) {
        let clock = ManualClock::at_unix(TEST_EPOCH);
        let bridge = bridge(&clock, vec![]);
        let headers = signed_headers(&test_webhook_secret(), "msg_1", TEST_EPOCH, body);
        assert_rejected!(bridge.handle_webhook(body, &headers).await, AuthError::MalformedPayload(_));
    }

    #[tokio::test]
    async fn test_handler_failure_is_collected() {
        let clock = ManualClock::at_unix(TEST_EPOCH);
        let failing = Arc::new(RecordingHandler::failing("failing"));
        let recorder = Arc::new(RecordingHandler::new("recorder"));
        let bridge = bridge(&clock, vec![failing.clone(), recorder.clone()]);
        let headers = signed_headers(&test_webhook_secret(), "msg_1", TEST_EPOCH, BODY);

        let delivery = bridge.handle_webhook(BODY, &headers).await.unwrap();
        let failures: Vec<_> = delivery.failures().map(|o| o.handler.as_str()).collect();
        assert_eq!(failures, ["failing"]);
        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_webhooks() {
        let headers = signed_headers(&test_webhook_secret(), "msg_1", TEST_EPOCH, BODY);
        assert_rejected!(
            TrustBridge::Unconfigured.handle_webhook(BODY, &headers).await,
            AuthError::Unconfigured
        );
    }
}
