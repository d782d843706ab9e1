//! External trust bridge: federated tokens from an identity provider.
//!
//! The bridge verifies tokens minted by an external provider (Clerk in
//! Forge's deployment) against the provider's public keys, and can exchange
//! a verified external token for a local session. Webhook ingestion lives in
//! [`webhook`](crate::webhook).
//!
//! Federation is optional. [`TrustBridge::Unconfigured`] answers every
//! operation with [`AuthError::Unconfigured`], so call sites never check for
//! missing configuration themselves.
//!
//! # Key Selection
//!
//! When the token header carries a `kid` and the configured keys carry ids,
//! only the key with that id is tried. Otherwise every key of the header
//! algorithm's family is tried in order, which is how several provider keys
//! can be trusted at once during a rotation.

use std::{sync::Arc, time::Duration};

use forge_cache::Cache;
use jsonwebtoken::{Algorithm, DecodingKey};

use crate::{
    clock::{Clock, SystemClock},
    error::{AuthError, Result},
    jwt::{ExternalClaims, decode_jwt_header, timestamp, verify_signature},
    principal::{Principal, PrincipalSource},
    token::{DEFAULT_CLOCK_SKEW, IssuedToken, TokenAuthority, skew_secs},
    validation::{KeyFamily, validate_external_algorithm},
    webhook::{WebhookHandler, WebhookSecret, WebhookVerifier},
};

/// Default tolerance for webhook timestamps (5 minutes either way).
pub const DEFAULT_WEBHOOK_TOLERANCE: Duration = Duration::from_secs(5 * 60);

/// Default retention of webhook replay guards (1 hour).
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(60 * 60);

/// A provider public key.
#[derive(Clone)]
pub struct ExternalKey {
    kid: Option<String>,
    family: KeyFamily,
    key: DecodingKey,
}

impl std::fmt::Debug for ExternalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalKey").field("kid", &self.kid).field("family", &self.family).finish()
    }
}

impl ExternalKey {
    /// Wraps an already-decoded key.
    #[must_use]
    pub fn new(family: KeyFamily, key: DecodingKey) -> Self {
        Self { kid: None, family, key }
    }

    /// Parses a PEM public key, detecting RSA, EC or Ed25519.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the PEM is not a public key
    /// of a supported family.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let bytes = pem.trim().as_bytes();
        if let Ok(key) = DecodingKey::from_rsa_pem(bytes) {
            return Ok(Self::new(KeyFamily::Rsa, key));
        }
        if let Ok(key) = DecodingKey::from_ec_pem(bytes) {
            return Ok(Self::new(KeyFamily::Ec, key));
        }
        if let Ok(key) = DecodingKey::from_ed_pem(bytes) {
            return Ok(Self::new(KeyFamily::Ed, key));
        }
        Err(AuthError::configuration("external public key is not an RSA, EC or Ed25519 PEM key"))
    }

    /// Attaches a key id.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// Key id, if any.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Key family.
    #[must_use]
    pub fn family(&self) -> KeyFamily {
        self.family
    }
}

/// The set of provider keys a bridge trusts. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct ExternalKeySet {
    keys: Vec<ExternalKey>,
}

impl ExternalKeySet {
    /// Creates a set from keys.
    #[must_use]
    pub fn new(keys: Vec<ExternalKey>) -> Self {
        Self { keys }
    }

    /// Parses one or more concatenated PEM public keys.
    ///
    /// Literal `\n` sequences are treated as newlines, since keys passed
    /// through environment variables often arrive escaped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if no key is found or any block
    /// fails to parse.
    pub fn from_pem_bundle(bundle: &str) -> Result<Self> {
        let bundle = bundle.replace("\\n", "\n");
        let keys = bundle
            .split_inclusive("-----END PUBLIC KEY-----")
            .filter(|block| block.contains("-----BEGIN"))
            .enumerate()
            .map(|(index, block)| {
                ExternalKey::from_pem(block).map_err(|e| {
                    AuthError::configuration(format!("external public key #{}: {e}", index + 1))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if keys.is_empty() {
            return Err(AuthError::configuration("no PEM public key found"));
        }
        Ok(Self { keys })
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys that may verify a token with this header.
    fn candidates(&self, kid: Option<&str>, family: KeyFamily) -> Vec<&ExternalKey> {
        let by_kid = kid.filter(|_| self.keys.iter().any(|key| key.kid.is_some()));
        self.keys
            .iter()
            .filter(|key| by_kid.is_none_or(|kid| key.kid.as_deref() == Some(kid)))
            .filter(|key| key.family == family)
            .collect()
    }
}

/// Trust material and policy for the external provider.
#[derive(Debug, Clone)]
pub struct ExternalTrustConfig {
    keys: ExternalKeySet,
    webhook_secret: Option<WebhookSecret>,
    audience: Option<String>,
    authorized_parties: Vec<String>,
    clock_skew: Duration,
    webhook_tolerance: Duration,
    replay_window: Duration,
}

#[bon::bon]
impl ExternalTrustConfig {
    /// Creates a new configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if:
    /// - neither keys nor a webhook secret are given
    /// - `webhook_tolerance` or `replay_window` is zero
    #[builder]
    pub fn new(
        #[builder(default)] keys: ExternalKeySet,
        webhook_secret: Option<WebhookSecret>,
        #[builder(into)] audience: Option<String>,
        #[builder(default)] authorized_parties: Vec<String>,
        #[builder(default = DEFAULT_CLOCK_SKEW)] clock_skew: Duration,
        #[builder(default = DEFAULT_WEBHOOK_TOLERANCE)] webhook_tolerance: Duration,
        #[builder(default = DEFAULT_REPLAY_WINDOW)] replay_window: Duration,
    ) -> Result<Self> {
        if keys.is_empty() && webhook_secret.is_none() {
            return Err(AuthError::configuration(
                "external trust needs a public key or a webhook secret",
            ));
        }
        if webhook_tolerance.is_zero() {
            return Err(AuthError::configuration("webhook tolerance must be positive"));
        }
        if replay_window.is_zero() {
            return Err(AuthError::configuration("replay window must be positive"));
        }
        Ok(Self {
            keys,
            webhook_secret,
            audience,
            authorized_parties,
            clock_skew,
            webhook_tolerance,
            replay_window,
        })
    }

    /// Trusted provider keys.
    #[must_use]
    pub fn keys(&self) -> &ExternalKeySet {
        &self.keys
    }

    /// Audience required when a token carries one.
    #[must_use]
    pub fn audience(&self) -> Option<&str> {
        self.audience.as_deref()
    }

    /// Webhook timestamp tolerance.
    #[must_use]
    pub fn webhook_tolerance(&self) -> Duration {
        self.webhook_tolerance
    }

    /// Replay guard retention.
    #[must_use]
    pub fn replay_window(&self) -> Duration {
        self.replay_window
    }

    /// Returns `true` if a webhook secret is configured.
    #[must_use]
    pub fn has_webhook_secret(&self) -> bool {
        self.webhook_secret.is_some()
    }
}

/// A local session minted for a verified external identity.
#[derive(Debug, Clone)]
pub struct FederatedSession {
    /// The external identity.
    pub external: Principal,
    /// The local session issued for it.
    pub session: IssuedToken,
}

/// State of a configured bridge.
pub struct ConfiguredBridge {
    pub(crate) config: ExternalTrustConfig,
    pub(crate) webhook: Option<WebhookVerifier>,
    pub(crate) cache: Cache,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) authority: Option<TokenAuthority>,
    pub(crate) handlers: Vec<Arc<dyn WebhookHandler>>,
}

impl std::fmt::Debug for ConfiguredBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredBridge")
            .field("keys", &self.config.keys.len())
            .field("webhooks", &self.webhook.is_some())
            .field("session_minting", &self.authority.is_some())
            .field("handlers", &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Trust in an external identity provider, if one is configured.
///
/// # Example
///
/// ```
/// use forge_authn::{AuthError, TrustBridge};
///
/// let bridge = TrustBridge::Unconfigured;
/// assert!(matches!(bridge.verify_external("a.b.c"), Err(AuthError::Unconfigured)));
/// ```
#[derive(Debug, Clone)]
pub enum TrustBridge {
    /// Federation is enabled.
    Configured(Arc<ConfiguredBridge>),
    /// Federation is disabled; every operation fails with
    /// [`AuthError::Unconfigured`].
    Unconfigured,
}

#[bon::bon]
impl TrustBridge {
    /// Builds a configured bridge.
    ///
    /// `authority` enables [`exchange`](Self::exchange). `handlers` receive
    /// every verified webhook event in registration order.
    #[builder(finish_fn = build)]
    pub fn configured(
        config: ExternalTrustConfig,
        cache: Cache,
        authority: Option<TokenAuthority>,
        #[builder(default)] handlers: Vec<Arc<dyn WebhookHandler>>,
        clock: Option<Arc<dyn Clock>>,
    ) -> Self {
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        tracing::info!(
            keys = config.keys.len(),
            webhooks = config.has_webhook_secret(),
            session_minting = authority.is_some(),
            handlers = handlers.len(),
            "external trust bridge configured"
        );
        let webhook = config
            .webhook_secret
            .clone()
            .map(|secret| WebhookVerifier::new(secret, config.webhook_tolerance));
        Self::Configured(Arc::new(ConfiguredBridge {
            config,
            webhook,
            cache,
            clock,
            authority,
            handlers,
        }))
    }
}

impl TrustBridge {
    /// Returns `true` unless this is [`TrustBridge::Unconfigured`].
    #[must_use]
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured(_))
    }

    pub(crate) fn bridge(&self) -> Result<&ConfiguredBridge> {
        match self {
            Self::Configured(bridge) => Ok(bridge),
            Self::Unconfigured => Err(AuthError::Unconfigured),
        }
    }

    /// Verifies a token issued by the external provider.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Unconfigured`] without a bridge or without keys
    /// - [`AuthError::InvalidTokenFormat`] for malformed tokens
    /// - [`AuthError::UnsupportedAlgorithm`] for `none` and HMAC headers
    /// - [`AuthError::SignatureInvalid`] if no trusted key verifies it
    /// - [`AuthError::MissingClaim`] without `sub` or `exp`
    /// - [`AuthError::Expired`], [`AuthError::TokenNotYetValid`]
    /// - [`AuthError::AudienceMismatch`] for a foreign `aud` or `azp`
    #[tracing::instrument(skip(self, token))]
    pub fn verify_external(&self, token: &str) -> Result<Principal> {
        let bridge = self.bridge()?;
        bridge.verify(token).inspect_err(|e| {
            tracing::debug!(error = %e, "external token rejected");
        })
    }

    /// Verifies an external token and mints a local session for its subject.
    ///
    /// # Errors
    ///
    /// Returns any [`verify_external`](Self::verify_external) error, and
    /// [`AuthError::Unconfigured`] if no token authority is attached.
    #[tracing::instrument(skip(self, token))]
    pub fn exchange(&self, token: &str) -> Result<FederatedSession> {
        let bridge = self.bridge()?;
        let authority = bridge.authority.as_ref().ok_or(AuthError::Unconfigured)?;
        let external = self.verify_external(token)?;
        let session = authority.issue(&external.subject, None)?;
        tracing::info!(subject = %external.subject, jti = %session.claims.jti, "federated session minted");
        Ok(FederatedSession { external, session })
    }
}

impl ConfiguredBridge {
    fn verify(&self, token: &str) -> Result<Principal> {
        if self.config.keys.is_empty() {
            return Err(AuthError::Unconfigured);
        }

        let header = decode_jwt_header(token)?;
        let algorithm = validate_external_algorithm(&header.alg)?;
        let claims = self.verify_signature(token, header.kid.as_deref(), algorithm)?;
        self.check_claims(claims)
    }

    fn verify_signature(
        &self,
        token: &str,
        kid: Option<&str>,
        algorithm: Algorithm,
    ) -> Result<ExternalClaims> {
        let family = KeyFamily::of(algorithm).ok_or(AuthError::SignatureInvalid)?;
        for key in self.config.keys.candidates(kid, family) {
            match verify_signature::<ExternalClaims>(token, &key.key, algorithm) {
                Ok(claims) => return Ok(claims),
                Err(AuthError::SignatureInvalid) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AuthError::SignatureInvalid)
    }

    fn check_claims(&self, claims: ExternalClaims) -> Result<Principal> {
        let subject = claims.sub.filter(|s| !s.is_empty()).ok_or_else(|| AuthError::missing_claim("sub"))?;
        let exp = claims.exp.ok_or_else(|| AuthError::missing_claim("exp"))?;
        if let Some(iat) = claims.iat
            && exp <= iat
        {
            return Err(AuthError::invalid_token_format("exp claim does not follow iat"));
        }

        let now = self.clock.now().timestamp();
        let horizon = now.saturating_add(skew_secs(self.config.clock_skew));
        if now >= exp {
            return Err(AuthError::Expired);
        }
        if claims.nbf.is_some_and(|nbf| nbf > horizon) || claims.iat.is_some_and(|iat| iat > horizon) {
            return Err(AuthError::TokenNotYetValid);
        }

        if let (Some(aud), Some(expected)) = (&claims.aud, &self.config.audience)
            && !aud.contains(expected)
        {
            return Err(AuthError::audience_mismatch(expected, aud.joined()));
        }
        if let Some(azp) = &claims.azp
            && !self.config.authorized_parties.is_empty()
            && !self.config.authorized_parties.contains(azp)
        {
            return Err(AuthError::audience_mismatch(self.config.authorized_parties.join(","), azp));
        }

        Ok(Principal {
            subject,
            token_id: claims.jti,
            expires_at: timestamp(exp, "exp")?,
            source: PrincipalSource::External,
            session_id: claims.sid,
        })
    }
}
