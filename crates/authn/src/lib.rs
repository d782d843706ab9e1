//! # Forge Authentication
//!
//! Session tokens and federated identity for Forge services.
//!
//! This crate provides:
//! - **Token authority**: HMAC-signed session JWTs with cache-backed revocation
//! - **External trust bridge**: verification of identity provider tokens,
//!   exchange for local sessions, and signed webhook ingestion
//! - **Algorithm validation**: `none` is never accepted, sessions are HMAC
//!   only, external tokens are asymmetric only
//!
//! Every time-dependent check reads an injected [`Clock`], so expiry,
//! issued-at and webhook timestamp rules are testable without sleeping.
//!
//! ## Example
//!
//! ```no_run
//! use forge_authn::{TokenAuthority, TokenAuthorityConfig};
//! use forge_cache::Cache;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TokenAuthorityConfig::builder()
//!     .secret("a-long-random-secret")
//!     .audience("forge.example.com")
//!     .build()?;
//! let authority = TokenAuthority::new(config, Cache::memory());
//!
//! let issued = authority.issue("user_2abc", None)?;
//! let principal = authority.verify(&issued.token).await?;
//! assert_eq!(principal.subject, "user_2abc");
//!
//! authority.revoke_token(&issued.token).await?;
//! assert!(authority.verify(&issued.token).await.is_err());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Forge API key generation.
pub mod api_key;
/// Time sources.
pub mod clock;
/// Authentication error types.
pub mod error;
/// External identity provider trust.
pub mod external;
/// User lifecycle events.
pub mod identity;
/// JWT decoding and claims.
pub mod jwt;
/// Authenticated principals.
pub mod principal;
/// Session token authority.
pub mod token;
/// Algorithm validation.
pub mod validation;
/// Signed webhook ingestion.
pub mod webhook;

/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

// Re-export key types for convenience
pub use api_key::generate_forge_api_key;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AuthError, Rejection, Result};
pub use external::{
    ExternalKey, ExternalKeySet, ExternalTrustConfig, FederatedSession, TrustBridge,
};
pub use identity::{ExternalUser, IdentitySink, SessionMintingHandler, UserEventKind};
pub use jwt::SessionClaims;
pub use principal::{Principal, PrincipalSource};
pub use token::{IssuedToken, TokenAuthority, TokenAuthorityConfig};
pub use webhook::{
    HandlerError, WebhookDelivery, WebhookEvent, WebhookHandler, WebhookHeaders, WebhookSecret,
};
