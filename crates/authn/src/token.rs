//! Session token authority.
//!
//! Issues and verifies HMAC-signed session JWTs. A token moves through
//! `issued → valid → (expired | revoked)`: expiry is a pure function of the
//! clock, revocation is an entry `revoked:{jti}` in the shared
//! [`Cache`] that lives exactly as long as the token would have.
//!
//! # Verification Order
//!
//! 1. Signature, including the header algorithm ([`AuthError::SignatureInvalid`])
//! 2. Claim presence and structure: `exp <= iat` is malformed regardless of
//!    anything else ([`AuthError::MissingClaim`], [`AuthError::InvalidTokenFormat`])
//! 3. Expiry, `now >= exp` ([`AuthError::Expired`])
//! 4. Issued-at further ahead than the skew grace ([`AuthError::TokenNotYetValid`])
//! 5. Audience ([`AuthError::AudienceMismatch`])
//! 6. Revocation ([`AuthError::Revoked`])
//!
//! Forged tokens never reach the revocation lookup, so response timing
//! reveals nothing about which token ids exist.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use forge_cache::Cache;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, encode};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    clock::{Clock, SystemClock},
    error::{AuthError, Result},
    jwt::{RawSessionClaims, SessionClaims, decode_jwt_header, timestamp, verify_signature},
    principal::{Principal, PrincipalSource},
    validation::{parse_algorithm, validate_session_algorithm},
};

/// Default session lifetime (60 minutes).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Default tolerance for issued-at timestamps ahead of the local clock.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(30);

/// Cache key prefix for revocation entries.
pub const REVOCATION_PREFIX: &str = "revoked:";

pub(crate) fn skew_secs(skew: Duration) -> i64 {
    i64::try_from(skew.as_secs()).unwrap_or(i64::MAX)
}

/// Signing configuration for [`TokenAuthority`].
#[derive(Clone)]
pub struct TokenAuthorityConfig {
    secret: Zeroizing<String>,
    algorithm: Algorithm,
    default_ttl: Duration,
    audience: String,
    clock_skew: Duration,
}

impl std::fmt::Debug for TokenAuthorityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthorityConfig")
            .field("secret", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .field("default_ttl", &self.default_ttl)
            .field("audience", &self.audience)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

#[bon::bon]
impl TokenAuthorityConfig {
    /// Creates a new configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if:
    /// - `secret` is empty or blank
    /// - `audience` is empty
    /// - `default_ttl` is under one second
    ///
    /// Returns [`AuthError::UnsupportedAlgorithm`] if `algorithm` is not an
    /// HMAC algorithm.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use forge_authn::TokenAuthorityConfig;
    ///
    /// let config = TokenAuthorityConfig::builder()
    ///     .secret("a-long-random-secret")
    ///     .audience("forge.example.com")
    ///     .default_ttl(Duration::from_secs(15 * 60))
    ///     .build()?;
    /// assert_eq!(config.audience(), "forge.example.com");
    /// # Ok::<(), forge_authn::AuthError>(())
    /// ```
    #[builder]
    pub fn new(
        #[builder(into)] secret: String,
        #[builder(default = Algorithm::HS256)] algorithm: Algorithm,
        #[builder(default = DEFAULT_TOKEN_TTL)] default_ttl: Duration,
        #[builder(into)] audience: String,
        #[builder(default = DEFAULT_CLOCK_SKEW)] clock_skew: Duration,
    ) -> Result<Self> {
        let secret = Zeroizing::new(secret);
        if secret.trim().is_empty() {
            return Err(AuthError::configuration("secret key is empty"));
        }
        validate_session_algorithm(algorithm)?;
        if default_ttl.as_secs() == 0 {
            return Err(AuthError::configuration("default token ttl must be at least one second"));
        }
        if audience.is_empty() {
            return Err(AuthError::configuration("audience is empty"));
        }
        Ok(Self { secret, algorithm, default_ttl, audience, clock_skew })
    }

    /// Signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Lifetime of tokens issued without an explicit ttl.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Audience bound into every token.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Issued-at tolerance.
    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }
}

/// A freshly signed session token and the claims inside it.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Compact JWS.
    pub token: String,
    /// Claims the token carries.
    pub claims: SessionClaims,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[REDACTED]")
            .field("claims", &self.claims)
            .finish()
    }
}

impl IssuedToken {
    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.claims.exp, 0).unwrap_or_default()
    }
}

struct AuthorityInner {
    config: TokenAuthorityConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    cache: Cache,
    clock: Arc<dyn Clock>,
}

/// Issues, verifies and revokes session tokens.
///
/// Cloning is cheap; clones share keys, cache and clock.
///
/// # Example
///
/// ```
/// use forge_authn::{TokenAuthority, TokenAuthorityConfig};
/// use forge_cache::Cache;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), forge_authn::AuthError> {
/// let config = TokenAuthorityConfig::builder()
///     .secret("a-long-random-secret")
///     .audience("forge.example.com")
///     .build()?;
/// let authority = TokenAuthority::new(config, Cache::memory());
///
/// let issued = authority.issue("user_123", None)?;
/// let principal = authority.verify(&issued.token).await?;
/// assert_eq!(principal.subject, "user_123");
///
/// authority.revoke_token(&issued.token).await?;
/// assert!(authority.verify(&issued.token).await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TokenAuthority {
    inner: Arc<AuthorityInner>,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.cache.backend_name())
            .field("clock", &self.inner.clock)
            .finish()
    }
}

impl TokenAuthority {
    /// Creates an authority reading the system clock.
    #[must_use]
    pub fn new(config: TokenAuthorityConfig, cache: Cache) -> Self {
        Self::with_clock(config, cache, Arc::new(SystemClock))
    }

    /// Creates an authority reading `clock`.
    #[must_use]
    pub fn with_clock(config: TokenAuthorityConfig, cache: Cache, clock: Arc<dyn Clock>) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self { inner: Arc::new(AuthorityInner { config, encoding_key, decoding_key, cache, clock }) }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TokenAuthorityConfig {
        &self.inner.config
    }

    /// Returns the current time on this authority's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Signs a session token for `subject`.
    ///
    /// `ttl` defaults to the configured lifetime and is truncated to whole
    /// seconds.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingClaim`] for an empty subject,
    /// [`AuthError::Configuration`] for a ttl under one second, and
    /// [`AuthError::TokenEncoding`] if signing fails.
    pub fn issue(&self, subject: &str, ttl: Option<Duration>) -> Result<IssuedToken> {
        if subject.is_empty() {
            return Err(AuthError::missing_claim("sub"));
        }
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| AuthError::configuration("token ttl is too large"))?;
        if ttl_secs == 0 {
            return Err(AuthError::configuration("token ttl must be at least one second"));
        }

        let iat = self.now().timestamp();
        let exp = iat
            .checked_add(ttl_secs)
            .ok_or_else(|| AuthError::configuration("token ttl is too large"))?;
        let claims = SessionClaims {
            sub: subject.to_owned(),
            iat,
            exp,
            aud: self.inner.config.audience.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(self.inner.config.algorithm), &claims, &self.inner.encoding_key)
            .map_err(AuthError::TokenEncoding)?;

        tracing::debug!(subject = %claims.sub, jti = %claims.jti, exp, "session token issued");
        Ok(IssuedToken { token, claims })
    }

    /// Verifies a session token.
    ///
    /// # Errors
    ///
    /// Returns the first failing check in the order listed in the
    /// [module documentation](self).
    #[tracing::instrument(skip(self, token))]
    pub async fn verify(&self, token: &str) -> Result<Principal> {
        let claims = self.verify_claims(token).inspect_err(|e| {
            tracing::debug!(error = %e, "session token rejected");
        })?;

        if self.is_revoked(&claims.jti).await {
            tracing::debug!(jti = %claims.jti, "session token revoked");
            return Err(AuthError::revoked(claims.jti));
        }

        tracing::debug!(subject = %claims.sub, jti = %claims.jti, "session token verified");
        Ok(Principal {
            subject: claims.sub,
            token_id: Some(claims.jti),
            expires_at: timestamp(claims.exp, "exp")?,
            source: PrincipalSource::Local,
            session_id: None,
        })
    }

    /// Every check except revocation.
    fn verify_claims(&self, token: &str) -> Result<SessionClaims> {
        let config = &self.inner.config;

        let header = decode_jwt_header(token)?;
        let algorithm = parse_algorithm(&header.alg).map_err(|_| AuthError::SignatureInvalid)?;
        if algorithm != config.algorithm {
            return Err(AuthError::SignatureInvalid);
        }
        let claims = verify_signature::<RawSessionClaims>(token, &self.inner.decoding_key, algorithm)?
            .require_all()?;

        if claims.exp <= claims.iat {
            return Err(AuthError::invalid_token_format("exp claim does not follow iat"));
        }

        let now = self.now().timestamp();
        if now >= claims.exp {
            return Err(AuthError::Expired);
        }
        if claims.iat > now.saturating_add(skew_secs(config.clock_skew)) {
            return Err(AuthError::TokenNotYetValid);
        }
        if claims.aud != config.audience {
            return Err(AuthError::audience_mismatch(&config.audience, &claims.aud));
        }
        Ok(claims)
    }

    /// Revokes token id `jti` until `expires_at`.
    ///
    /// Returns `false` without writing anything if `expires_at` has already
    /// passed, since an expired token is rejected anyway.
    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) -> bool {
        let now = self.now();
        let Some(remaining) = (expires_at - now).to_std().ok().filter(|d| !d.is_zero()) else {
            tracing::debug!("token already expired, nothing to revoke");
            return false;
        };
        self.inner
            .cache
            .set(&revocation_key(jti), now.timestamp().to_string(), Some(remaining))
            .await;
        tracing::info!(ttl_secs = remaining.as_secs(), "session token revoked");
        true
    }

    /// Verifies `token` and revokes its id, returning the id.
    ///
    /// Revoking an already-revoked token succeeds.
    ///
    /// # Errors
    ///
    /// Returns any verification error other than [`AuthError::Revoked`].
    pub async fn revoke_token(&self, token: &str) -> Result<String> {
        let claims = self.verify_claims(token)?;
        self.revoke(&claims.jti, timestamp(claims.exp, "exp")?).await;
        Ok(claims.jti)
    }

    /// Returns `true` if a revocation entry exists for `jti`.
    ///
    /// An unreachable cache reads as "not revoked".
    pub async fn is_revoked(&self, jti: &str) -> bool {
        self.inner.cache.exists(&revocation_key(jti)).await
    }
}

fn revocation_key(jti: &str) -> String {
    format!("{REVOCATION_PREFIX}{jti}")
}
