//! The environment surface of the security core.
//!
//! [`ForgeSettings::from_env`] reads every variable once at startup. Values
//! are only parsed here; whether the required secrets are present and strong
//! enough is decided by [`ForgeSettings::validate`], which
//! [`SecurityCore::initialize`](crate::SecurityCore::initialize) calls.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `ENVIRONMENT` | `development` |
//! | `DATABASE_URL` | unset |
//! | `REDIS_URL` | unset (in-process cache) |
//! | `REDIS_PREFIX` | `forge` |
//! | `FORCE_MEMORY_CACHE`, `DEBUG_CACHE`, `FORGE_DEBUG_LOGGING` | `false` |
//! | `SECRET_KEY` | required |
//! | `ALGORITHM` | `HS256` |
//! | `ACCESS_TOKEN_EXPIRE_MINUTES` | `60` |
//! | `APP_DOMAIN` | `localhost` |
//! | `ENCRYPTION_KEY` | required |
//! | `ENCRYPTION_KEY_PREVIOUS` | unset |
//! | `CLERK_JWT_PUBLIC_KEY`, `CLERK_WEBHOOK_SECRET`, `CLERK_API_KEY`, `CLERK_API_URL` | unset |

use std::{fmt, str::FromStr, time::Duration};

use zeroize::Zeroizing;

use crate::error::{Result, SecurityError};

/// Placeholder session secret shipped in sample configuration.
pub const PLACEHOLDER_SECRET_KEY: &str = "your_secret_key_here";

/// Minimum `SECRET_KEY` length in production.
pub const MIN_PRODUCTION_SECRET_LEN: usize = 32;

const DEFAULT_REDIS_PREFIX: &str = "forge";
const DEFAULT_ALGORITHM: &str = "HS256";
const DEFAULT_ACCESS_TOKEN_MINUTES: u64 = 60;
const DEFAULT_APP_DOMAIN: &str = "localhost";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development.
    #[default]
    Development,
    /// Automated tests.
    Test,
    /// Pre-production.
    Staging,
    /// Production: weak secrets are refused.
    Production,
}

impl Environment {
    /// Returns `true` for [`Environment::Production`].
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = SecurityError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "test" | "testing" => Ok(Self::Test),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(SecurityError::configuration(format!("unknown ENVIRONMENT '{other}'"))),
        }
    }
}

/// Identity provider (Clerk) settings.
#[derive(Clone, Default)]
pub struct ProviderSettings {
    /// `CLERK_JWT_PUBLIC_KEY`, one or more PEM keys with `\n` unescaped.
    pub jwt_public_key: Option<String>,
    /// `CLERK_WEBHOOK_SECRET`, the `whsec_` signing secret.
    pub webhook_secret: Option<Zeroizing<String>>,
    /// `CLERK_API_KEY`, carried for callers of the provider's API.
    pub api_key: Option<Zeroizing<String>>,
    /// `CLERK_API_URL`.
    pub api_url: Option<String>,
}

impl ProviderSettings {
    /// Returns `true` if any trust material is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.jwt_public_key.is_some() || self.webhook_secret.is_some()
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("jwt_public_key", &self.jwt_public_key.is_some())
            .field("webhook_secret", &redacted(self.webhook_secret.as_ref()))
            .field("api_key", &redacted(self.api_key.as_ref()))
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Settings for the whole security core.
#[derive(Clone)]
pub struct ForgeSettings {
    /// `ENVIRONMENT`.
    pub environment: Environment,
    /// `DATABASE_URL`, carried for the persistence layer.
    pub database_url: Option<String>,
    /// `REDIS_URL`.
    pub redis_url: Option<String>,
    /// `REDIS_PREFIX`.
    pub redis_prefix: String,
    /// `FORCE_MEMORY_CACHE`.
    pub force_memory_cache: bool,
    /// `DEBUG_CACHE`.
    pub debug_cache: bool,
    /// `FORGE_DEBUG_LOGGING`.
    pub debug_logging: bool,
    /// `SECRET_KEY`.
    pub secret_key: Option<Zeroizing<String>>,
    /// `ALGORITHM`.
    pub algorithm: String,
    /// `ACCESS_TOKEN_EXPIRE_MINUTES`.
    pub access_token_ttl: Duration,
    /// `APP_DOMAIN`, the session audience.
    pub app_domain: String,
    /// `ENCRYPTION_KEY`.
    pub encryption_key: Option<Zeroizing<String>>,
    /// `ENCRYPTION_KEY_PREVIOUS`, comma-separated.
    pub previous_encryption_keys: Option<Zeroizing<String>>,
    /// Identity provider settings.
    pub provider: ProviderSettings,
}

impl Default for ForgeSettings {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            database_url: None,
            redis_url: None,
            redis_prefix: DEFAULT_REDIS_PREFIX.to_owned(),
            force_memory_cache: false,
            debug_cache: false,
            debug_logging: false,
            secret_key: None,
            algorithm: DEFAULT_ALGORITHM.to_owned(),
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_MINUTES * 60),
            app_domain: DEFAULT_APP_DOMAIN.to_owned(),
            encryption_key: None,
            previous_encryption_keys: None,
            provider: ProviderSettings::default(),
        }
    }
}

impl fmt::Debug for ForgeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForgeSettings")
            .field("environment", &self.environment)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("redis_prefix", &self.redis_prefix)
            .field("force_memory_cache", &self.force_memory_cache)
            .field("debug_cache", &self.debug_cache)
            .field("debug_logging", &self.debug_logging)
            .field("secret_key", &redacted(self.secret_key.as_ref()))
            .field("algorithm", &self.algorithm)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("app_domain", &self.app_domain)
            .field("encryption_key", &redacted(self.encryption_key.as_ref()))
            .field("previous_encryption_keys", &redacted(self.previous_encryption_keys.as_ref()))
            .field("provider", &self.provider)
            .finish()
    }
}

fn redacted(value: Option<&Zeroizing<String>>) -> Option<&'static str> {
    value.map(|_| "[REDACTED]")
}

impl ForgeSettings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::Configuration`] if a value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`. Blank values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::Configuration`] if a value cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let secret = |name: &str| read(name).map(Zeroizing::new);
        let flag = |name: &str| read(name).map(|v| parse_bool(name, &v)).transpose();

        let defaults = Self::default();
        let access_token_ttl = match read("ACCESS_TOKEN_EXPIRE_MINUTES") {
            Some(raw) => parse_minutes(&raw)?,
            None => defaults.access_token_ttl,
        };

        Ok(Self {
            environment: read("ENVIRONMENT").map(|v| v.parse::<Environment>()).transpose()?.unwrap_or_default(),
            database_url: read("DATABASE_URL"),
            redis_url: read("REDIS_URL"),
            redis_prefix: read("REDIS_PREFIX").unwrap_or(defaults.redis_prefix),
            force_memory_cache: flag("FORCE_MEMORY_CACHE")?.unwrap_or(false),
            debug_cache: flag("DEBUG_CACHE")?.unwrap_or(false),
            debug_logging: flag("FORGE_DEBUG_LOGGING")?.unwrap_or(false),
            secret_key: secret("SECRET_KEY"),
            algorithm: read("ALGORITHM").unwrap_or(defaults.algorithm),
            access_token_ttl,
            app_domain: read("APP_DOMAIN").unwrap_or(defaults.app_domain),
            encryption_key: secret("ENCRYPTION_KEY"),
            previous_encryption_keys: secret("ENCRYPTION_KEY_PREVIOUS"),
            provider: ProviderSettings {
                jwt_public_key: read("CLERK_JWT_PUBLIC_KEY").map(|pem| pem.replace("\\n", "\n")),
                webhook_secret: secret("CLERK_WEBHOOK_SECRET"),
                api_key: secret("CLERK_API_KEY"),
                api_url: read("CLERK_API_URL"),
            },
        })
    }

    /// Checks that required secrets are present and, in production, strong.
    ///
    /// Outside production a weak `SECRET_KEY` is accepted with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::Configuration`] naming the first problem.
    pub fn validate(&self) -> Result<()> {
        let secret = self
            .secret_key
            .as_deref()
            .map(String::as_str)
            .ok_or_else(|| SecurityError::configuration("SECRET_KEY is required"))?;
        if self.encryption_key.is_none() {
            return Err(SecurityError::configuration("ENCRYPTION_KEY is required"));
        }

        let weakness = if secret == PLACEHOLDER_SECRET_KEY {
            Some("SECRET_KEY is the sample placeholder")
        } else if secret.len() < MIN_PRODUCTION_SECRET_LEN {
            Some("SECRET_KEY is shorter than 32 bytes")
        } else {
            None
        };
        match weakness {
            Some(reason) if self.environment.is_production() => {
                Err(SecurityError::configuration(reason))
            },
            Some(reason) => {
                tracing::warn!(environment = %self.environment, "{reason}; refused in production");
                Ok(())
            },
            None => Ok(()),
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SecurityError::configuration(format!("{name} must be a boolean, got '{value}'"))),
    }
}

fn parse_minutes(value: &str) -> Result<Duration> {
    match value.parse::<u64>() {
        Ok(minutes) if minutes > 0 => minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| SecurityError::configuration("ACCESS_TOKEN_EXPIRE_MINUTES is too large")),
        _ => Err(SecurityError::configuration(format!(
            "ACCESS_TOKEN_EXPIRE_MINUTES must be a positive integer, got '{value}'"
        ))),
    }
}
