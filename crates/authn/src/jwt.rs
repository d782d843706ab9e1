//! JWT decoding and claims.
//!
//! Both verifiers use the helpers here the same way: peek at the header
//! without trusting it, verify the signature with the built-in time and
//! audience checks disabled, then apply time and audience rules against an
//! injected [`Clock`](crate::Clock). Keeping those rules out of
//! `jsonwebtoken` lets every check use the same clock and the same skew
//! grace, and makes the check order explicit.

use std::collections::HashSet;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::AuthError;

/// Unverified JWT header fields.
///
/// `alg` is kept as a string so that values `jsonwebtoken` cannot represent,
/// such as `none`, still produce a precise rejection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm name.
    pub alg: String,
    /// Key id, if the issuer sets one.
    #[serde(default)]
    pub kid: Option<String>,
}

/// Claims carried by a Forge session token.
///
/// ```json
/// {
///   "sub": "user_2abc",
///   "iat": 1700000000,
///   "exp": 1700003600,
///   "aud": "forge.example.com",
///   "jti": "0f0e8a9c-5d0b-4c52-9d8e-3b1f4c3f8a11"
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject the session was issued to.
    pub sub: String,
    /// Issued at (seconds since epoch).
    pub iat: i64,
    /// Expiration time (seconds since epoch).
    pub exp: i64,
    /// Audience, the configured application domain.
    pub aud: String,
    /// Unique token id (UUIDv4), the revocation handle.
    pub jti: String,
}

/// Session claims as decoded, before presence checks.
#[derive(Debug, Deserialize)]
pub(crate) struct RawSessionClaims {
    sub: Option<String>,
    iat: Option<i64>,
    exp: Option<i64>,
    aud: Option<String>,
    jti: Option<String>,
}

impl RawSessionClaims {
    /// Requires every session claim to be present and non-empty.
    pub(crate) fn require_all(self) -> Result<SessionClaims, AuthError> {
        Ok(SessionClaims {
            sub: non_empty(self.sub, "sub")?,
            iat: self.iat.ok_or_else(|| AuthError::missing_claim("iat"))?,
            exp: self.exp.ok_or_else(|| AuthError::missing_claim("exp"))?,
            aud: non_empty(self.aud, "aud")?,
            jti: non_empty(self.jti, "jti")?,
        })
    }
}

/// Audience claim, which RFC 7519 allows as a string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AudienceClaim {
    /// A single audience.
    One(String),
    /// Several audiences.
    Many(Vec<String>),
}

impl AudienceClaim {
    /// Returns `true` if `audience` is among the values.
    #[must_use]
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(value) => value == audience,
            Self::Many(values) => values.iter().any(|value| value == audience),
        }
    }

    /// Renders the values for error messages.
    #[must_use]
    pub fn joined(&self) -> String {
        match self {
            Self::One(value) => value.clone(),
            Self::Many(values) => values.join(","),
        }
    }
}

/// Claims read from an externally-issued token.
///
/// Only `sub` and `exp` are required. Identity providers such as Clerk add
/// `sid` (session id) and `azp` (authorized party) to their session tokens.
#[derive(Clone, Debug, Deserialize)]
pub struct ExternalClaims {
    /// Subject, the provider's user id.
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiration time (seconds since epoch).
    #[serde(default)]
    pub exp: Option<i64>,
    /// Issued at (seconds since epoch).
    #[serde(default)]
    pub iat: Option<i64>,
    /// Not before (seconds since epoch).
    #[serde(default)]
    pub nbf: Option<i64>,
    /// Audience, if the provider sets one.
    #[serde(default)]
    pub aud: Option<AudienceClaim>,
    /// Authorized party (the origin the token was minted for).
    #[serde(default)]
    pub azp: Option<String>,
    /// Provider session id.
    #[serde(default)]
    pub sid: Option<String>,
    /// Token id.
    #[serde(default)]
    pub jti: Option<String>,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
}

fn non_empty(value: Option<String>, claim: &str) -> Result<String, AuthError> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| AuthError::missing_claim(claim))
}

/// Decode JWT header without verification.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the token does not have
/// three dot-separated parts or the header is not base64url JSON with an
/// `alg` field.
pub fn decode_jwt_header(token: &str) -> Result<TokenHeader, AuthError> {
    let mut parts = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::invalid_token_format("JWT must have 3 parts separated by dots"));
    };

    let bytes = URL_SAFE_NO_PAD.decode(header).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to decode JWT header: {e}"))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::invalid_token_format(format!("Failed to parse JWT header: {e}")))
}

/// Verify a JWT signature and deserialize its claims.
///
/// Only the signature and the algorithm/key pairing are checked. Expiry,
/// not-before, audience and required-claim checks are left to the caller.
///
/// # Errors
///
/// Returns [`AuthError::SignatureInvalid`] for a bad signature or an
/// algorithm that does not match the key, and
/// [`AuthError::InvalidTokenFormat`] if the claims do not deserialize.
pub fn verify_signature<T: DeserializeOwned>(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
) -> Result<T, AuthError> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation.leeway = 0;

    let token_data = decode::<T>(token, key, &validation)?;
    Ok(token_data.claims)
}

/// Converts a numeric date claim into a timestamp.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the value is out of range.
pub fn timestamp(secs: i64, claim: &str) -> Result<DateTime<Utc>, AuthError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AuthError::invalid_token_format(format!("{claim} claim is out of range")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn b64(value: &serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
    }

    #[test]
    fn test_decode_header_keeps_unrepresentable_algorithms() {
        let token = format!("{}.{}.", b64(&json!({"alg": "none"})), b64(&json!({})));
        let header = decode_jwt_header(&token).unwrap();
        assert_eq!(header.alg, "none");
        assert_eq!(header.kid, None);
    }

    #[test]
    fn test_decode_header_reads_kid() {
        let token =
            format!("{}.e30.sig", b64(&json!({"alg": "RS256", "kid": "ins_2abc", "typ": "JWT"})));
        assert_eq!(decode_jwt_header(&token).unwrap().kid.as_deref(), Some("ins_2abc"));
    }

    #[rstest]
    #[case::empty("")]
    #[case::one_part("abc")]
    #[case::two_parts("abc.def")]
    #[case::four_parts("a.b.c.d")]
    #[case::not_base64("!!!.e30.sig")]
    #[case::not_json("bm90IGpzb24.e30.sig")]
    fn test_decode_header_rejects_malformed(#[case] token: &str) {
        assert!(matches!(decode_jwt_header(token), Err(AuthError::InvalidTokenFormat(_))));
    }

    #[test]
    fn test_raw_session_claims_require_every_claim() {
        let raw: RawSessionClaims =
            serde_json::from_value(json!({"sub": "u", "iat": 1, "exp": 2, "aud": "a"})).unwrap();
        assert!(matches!(raw.require_all(), Err(AuthError::MissingClaim(ref c)) if c == "jti"));

        let raw: RawSessionClaims =
            serde_json::from_value(json!({"sub": "", "iat": 1, "exp": 2, "aud": "a", "jti": "j"}))
                .unwrap();
        assert!(matches!(raw.require_all(), Err(AuthError::MissingClaim(ref c)) if c == "sub"));
    }

    #[test]
    fn test_audience_claim_forms() {
        let one: AudienceClaim = serde_json::from_value(json!("forge")).unwrap();
        let many: AudienceClaim = serde_json::from_value(json!(["a", "forge"])).unwrap();
        assert!(one.contains("forge"));
        assert!(many.contains("forge"));
        assert!(!many.contains("b"));
        assert_eq!(many.joined(), "a,forge");
    }

    #[test]
    fn test_verify_signature_ignores_time_claims() {
        let claims = json!({"sub": "u", "iat": 10, "exp": 20, "aud": "x", "jti": "j"});
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(b"k"))
            .unwrap();

        // Long expired, but only the signature is checked here.
        let decoded: SessionClaims =
            verify_signature(&token, &DecodingKey::from_secret(b"k"), Algorithm::HS256).unwrap();
        assert_eq!(decoded.exp, 20);

        let wrong_key =
            verify_signature::<SessionClaims>(&token, &DecodingKey::from_secret(b"x"), Algorithm::HS256);
        assert!(matches!(wrong_key, Err(AuthError::SignatureInvalid)));

        let wrong_alg =
            verify_signature::<SessionClaims>(&token, &DecodingKey::from_secret(b"k"), Algorithm::HS512);
        assert!(matches!(wrong_alg, Err(AuthError::SignatureInvalid)));
    }

    #[test]
    fn test_timestamp_range() {
        assert_eq!(timestamp(0, "exp").unwrap().timestamp(), 0);
        assert!(matches!(timestamp(i64::MAX, "exp"), Err(AuthError::InvalidTokenFormat(_))));
    }
}
