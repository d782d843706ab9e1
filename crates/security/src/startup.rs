//! Startup assembly of the security core.
//!
//! Components are built in dependency order: the cache first, then the
//! vault, the token authority (which revokes through the cache) and finally
//! the external trust bridge (which mints sessions through the authority and
//! guards replays through the cache). Any failure aborts startup.

use std::sync::Arc;

use forge_authn::{
    Clock, ExternalKeySet, ExternalTrustConfig, IdentitySink, SessionMintingHandler, SystemClock,
    TokenAuthority, TokenAuthorityConfig, TrustBridge, WebhookHandler, WebhookSecret,
    validation::parse_algorithm,
};
use forge_cache::{Cache, CacheConfig};
use forge_vault::SecretVault;

use crate::{
    error::{Result, SecurityError},
    settings::ForgeSettings,
};

/// The assembled security components, shared by every request handler.
///
/// Cloning is cheap; all components are reference counted.
#[derive(Debug, Clone)]
pub struct SecurityCore {
    cache: Cache,
    vault: Arc<SecretVault>,
    authority: TokenAuthority,
    bridge: TrustBridge,
}

#[bon::bon]
impl SecurityCore {
    /// Assembles the core with optional extras.
    ///
    /// `identity_sink` registers a [`SessionMintingHandler`] ahead of any
    /// `handlers`. Both are ignored, with a warning, when no identity provider
    /// is configured. `clock` replaces the system clock for the authority and
    /// the bridge.
    ///
    /// # Errors
    ///
    /// See [`SecurityCore::initialize`].
    #[builder(finish_fn = initialize)]
    pub async fn assemble(
        settings: ForgeSettings,
        identity_sink: Option<Arc<dyn IdentitySink>>,
        #[builder(default)] handlers: Vec<Arc<dyn WebhookHandler>>,
        clock: Option<Arc<dyn Clock>>,
    ) -> Result<Self> {
        settings.validate()?;
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));

        let cache = connect_cache(&settings).await?;
        let vault = Arc::new(open_vault(&settings)?);
        let authority =
            TokenAuthority::with_clock(authority_config(&settings)?, cache.clone(), clock.clone());

        let mut registered: Vec<Arc<dyn WebhookHandler>> = Vec::with_capacity(handlers.len() + 1);
        if let Some(sink) = identity_sink {
            registered.push(Arc::new(SessionMintingHandler::new(authority.clone(), sink)));
        }
        registered.extend(handlers);

        let bridge = match trust_config(&settings)? {
            Some(config) => TrustBridge::configured()
                .config(config)
                .cache(cache.clone())
                .authority(authority.clone())
                .handlers(registered)
                .clock(clock)
                .build(),
            None => {
                if !registered.is_empty() {
                    tracing::warn!(
                        handlers = registered.len(),
                        "webhook handlers registered but no identity provider is configured"
                    );
                }
                TrustBridge::Unconfigured
            },
        };

        tracing::info!(
            cache = cache.backend_name(),
            vault_key = %vault.active_key_id(),
            federation = bridge.is_configured(),
            environment = %settings.environment,
            "security core initialized"
        );
        Ok(Self { cache, vault, authority, bridge })
    }
}

impl SecurityCore {
    /// Validates `settings` and assembles the core.
    ///
    /// # Errors
    ///
    /// - [`SecurityError::Configuration`] if `SECRET_KEY` or `ENCRYPTION_KEY`
    ///   is missing, or the secret is too weak for production
    /// - [`SecurityError::Cache`] if the cache configuration is invalid
    /// - [`SecurityError::Vault`] if a vault key cannot be decoded
    /// - [`SecurityError::Auth`] if the algorithm, token lifetime or provider
    ///   trust material is rejected
    pub async fn initialize(settings: &ForgeSettings) -> Result<Self> {
        Self::assemble().settings(settings.clone()).initialize().await
    }

    /// Shared cache.
    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Secret vault.
    #[must_use]
    pub fn vault(&self) -> &SecretVault {
        &self.vault
    }

    /// Session token authority.
    #[must_use]
    pub fn authority(&self) -> &TokenAuthority {
        &self.authority
    }

    /// External trust bridge; [`TrustBridge::Unconfigured`] without provider
    /// settings.
    #[must_use]
    pub fn bridge(&self) -> &TrustBridge {
        &self.bridge
    }
}

async fn connect_cache(settings: &ForgeSettings) -> Result<Cache> {
    let config = CacheConfig::builder()
        .maybe_redis_url(settings.redis_url.clone())
        .force_memory(settings.force_memory_cache)
        .prefix(settings.redis_prefix.clone())
        .debug(settings.debug_cache)
        .build()?;
    Ok(Cache::connect(&config).await?)
}

fn open_vault(settings: &ForgeSettings) -> Result<SecretVault> {
    let active = settings.encryption_key.as_deref().map(String::as_str);
    let retired = settings.previous_encryption_keys.as_deref().map(String::as_str);
    Ok(SecretVault::from_encoded(active, retired)?)
}

fn authority_config(settings: &ForgeSettings) -> Result<TokenAuthorityConfig> {
    let secret = settings
        .secret_key
        .as_deref()
        .ok_or_else(|| SecurityError::configuration("SECRET_KEY is required"))?;
    Ok(TokenAuthorityConfig::builder()
        .secret(secret.as_str())
        .algorithm(parse_algorithm(&settings.algorithm)?)
        .default_ttl(settings.access_token_ttl)
        .audience(settings.app_domain.clone())
        .build()?)
}

fn trust_config(settings: &ForgeSettings) -> Result<Option<ExternalTrustConfig>> {
    let provider = &settings.provider;
    if !provider.is_configured() {
        return Ok(None);
    }
    let keys = provider
        .jwt_public_key
        .as_deref()
        .map(ExternalKeySet::from_pem_bundle)
        .transpose()?
        .unwrap_or_default();
    let webhook_secret = provider
        .webhook_secret
        .as_deref()
        .map(|secret| WebhookSecret::parse(secret))
        .transpose()?;
    Ok(Some(
        ExternalTrustConfig::builder()
            .keys(keys)
            .maybe_webhook_secret(webhook_secret)
            .audience(settings.app_domain.clone())
            .build()?,
    ))
}
