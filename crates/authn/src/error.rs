//! Authentication error types.
//!
//! Every rejection the token authority or the trust bridge can produce is a
//! distinct [`AuthError`] variant, so request handling can map outcomes
//! without string matching. [`AuthError::rejection`] collapses them into the
//! three outcomes a request handler actually distinguishes.

use thiserror::Error;

/// Authentication and federation errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`: new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Missing or unusable signing material, detected at construction.
    #[error("Authentication configuration error: {0}")]
    Configuration(String),

    /// Signature verification failed, or the token was signed with an
    /// algorithm other than the one configured.
    #[error("Invalid signature")]
    SignatureInvalid,

    /// Token has expired.
    #[error("Token expired")]
    Expired,

    /// Token was issued, or becomes valid, further in the future than the
    /// clock-skew grace allows.
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// Audience doesn't match the expected value.
    #[error("Audience mismatch: expected '{expected}', got '{actual}'")]
    AudienceMismatch {
        /// Audience this verifier accepts.
        expected: String,
        /// Audience the token carries.
        actual: String,
    },

    /// Token id has a revocation entry.
    #[error("Token revoked: {jti}")]
    Revoked {
        /// Revoked token id.
        jti: String,
    },

    /// Webhook event id was already delivered inside the replay window.
    #[error("Webhook replay detected: {event_id}")]
    ReplayDetected {
        /// Replayed event id.
        event_id: String,
    },

    /// Malformed JWT, or claims that are structurally inconsistent.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Required claim is missing.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// Algorithm not allowed for this verifier.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Webhook timestamp is unparseable or outside the tolerance window.
    #[error("Webhook timestamp outside tolerance")]
    WebhookTimestampInvalid,

    /// Verified webhook body is not a well-formed event.
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// No external identity provider is configured for this operation.
    #[error("External identity provider not configured")]
    Unconfigured,

    /// A token could not be signed.
    #[error("Token encoding failed: {0}")]
    TokenEncoding(#[source] jsonwebtoken::errors::Error),
}

/// How a request handler should treat an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// The caller is not authenticated (401).
    Unauthenticated,
    /// The request duplicates one already processed (409).
    Conflict,
    /// The server cannot authenticate anyone for this route (500/503).
    Misconfigured,
}

impl AuthError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a new `InvalidTokenFormat` error.
    #[must_use]
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(message.into())
    }

    /// Creates a new `MissingClaim` error.
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim(claim.into())
    }

    /// Creates a new `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }

    /// Creates a new `MalformedPayload` error.
    #[must_use]
    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self::MalformedPayload(message.into())
    }

    /// Creates a new `AudienceMismatch` error.
    #[must_use]
    pub fn audience_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::AudienceMismatch { expected: expected.into(), actual: actual.into() }
    }

    /// Creates a new `Revoked` error.
    #[must_use]
    pub fn revoked(jti: impl Into<String>) -> Self {
        Self::Revoked { jti: jti.into() }
    }

    /// Creates a new `ReplayDetected` error.
    #[must_use]
    pub fn replay_detected(event_id: impl Into<String>) -> Self {
        Self::ReplayDetected { event_id: event_id.into() }
    }

    /// Classifies this error for request handling.
    #[must_use]
    pub fn rejection(&self) -> Rejection {
        match self {
            Self::ReplayDetected { .. } => Rejection::Conflict,
            Self::Configuration(_) | Self::Unconfigured | Self::TokenEncoding(_) => {
                Rejection::Misconfigured
            },
            _ => Rejection::Unauthenticated,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidKeyFormat => AuthError::SignatureInvalid,
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::MissingRequiredClaim(claim) => AuthError::missing_claim(claim.clone()),
            ErrorKind::InvalidAlgorithmName | ErrorKind::MissingAlgorithm => {
                AuthError::unsupported_algorithm("Algorithm not supported")
            },
            ErrorKind::InvalidToken => AuthError::invalid_token_format("Invalid JWT structure"),
            _ => AuthError::invalid_token_format(format!("JWT error: {err}")),
        }
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(AuthError::Expired.to_string(), "Token expired");
        assert_eq!(AuthError::missing_claim("sub").to_string(), "Missing claim: sub");
        assert_eq!(
            AuthError::audience_mismatch("forge.example", "other.example").to_string(),
            "Audience mismatch: expected 'forge.example', got 'other.example'"
        );
        assert_eq!(AuthError::revoked("abc").to_string(), "Token revoked: abc");
        assert_eq!(
            AuthError::replay_detected("msg_1").to_string(),
            "Webhook replay detected: msg_1"
        );
    }

    #[rstest]
    #[case::signature(ErrorKind::InvalidSignature)]
    #[case::algorithm(ErrorKind::InvalidAlgorithm)]
    #[case::key_format(ErrorKind::InvalidKeyFormat)]
    fn test_signature_failures_map_to_signature_invalid(#[case] kind: ErrorKind) {
        let err: AuthError = JwtError::from(kind).into();
        assert!(matches!(err, AuthError::SignatureInvalid));
    }

    #[test]
    fn test_error_from_jsonwebtoken() {
        let err: AuthError = JwtError::from(ErrorKind::ExpiredSignature).into();
        assert!(matches!(err, AuthError::Expired));

        let err: AuthError = JwtError::from(ErrorKind::ImmatureSignature).into();
        assert!(matches!(err, AuthError::TokenNotYetValid));

        let err: AuthError = JwtError::from(ErrorKind::MissingRequiredClaim("exp".into())).into();
        assert!(matches!(err, AuthError::MissingClaim(ref c) if c == "exp"));

        let err: AuthError = JwtError::from(ErrorKind::InvalidToken).into();
        assert!(matches!(err, AuthError::InvalidTokenFormat(_)));
    }

    #[rstest]
    #[case::signature(AuthError::SignatureInvalid, Rejection::Unauthenticated)]
    #[case::expired(AuthError::Expired, Rejection::Unauthenticated)]
    #[case::revoked(AuthError::revoked("j"), Rejection::Unauthenticated)]
    #[case::audience(AuthError::audience_mismatch("a", "b"), Rejection::Unauthenticated)]
    #[case::timestamp(AuthError::WebhookTimestampInvalid, Rejection::Unauthenticated)]
    #[case::replay(AuthError::replay_detected("e"), Rejection::Conflict)]
    #[case::unconfigured(AuthError::Unconfigured, Rejection::Misconfigured)]
    #[case::configuration(AuthError::configuration("no key"), Rejection::Misconfigured)]
    fn test_rejection_classification(#[case] err: AuthError, #[case] expected: Rejection) {
        assert_eq!(err.rejection(), expected);
    }

    #[test]
    fn test_token_encoding_preserves_source() {
        use std::error::Error;

        let err = AuthError::TokenEncoding(JwtError::from(ErrorKind::InvalidKeyFormat));
        assert!(err.source().is_some());
    }
}
