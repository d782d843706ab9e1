//! # Forge Security
//!
//! Settings and startup wiring for the Forge security core.
//!
//! [`ForgeSettings`] reads the environment; [`SecurityCore`] assembles the
//! cache, secret vault, token authority and external trust bridge from it,
//! refusing to start when a required secret is missing.
//!
//! ## Example
//!
//! ```no_run
//! use forge_security::{ForgeSettings, SecurityCore, init_tracing};
//!
//! # async fn example() -> Result<(), forge_security::SecurityError> {
//! let settings = ForgeSettings::from_env()?;
//! init_tracing(settings.debug_logging);
//!
//! let core = SecurityCore::initialize(&settings).await?;
//! let session = core.authority().issue("user_2abc", None)?;
//! let principal = core.authority().verify(&session.token).await?;
//! assert_eq!(principal.subject, "user_2abc");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Startup error types.
pub mod error;
/// Tracing subscriber setup.
pub mod observability;
/// Environment settings.
pub mod settings;
/// Security core assembly.
pub mod startup;

pub use error::{Result, SecurityError};
pub use observability::init_tracing;
pub use settings::{Environment, ForgeSettings, ProviderSettings};
pub use startup::SecurityCore;
