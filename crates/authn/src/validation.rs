//! JWT algorithm validation.
//!
//! Session tokens and external tokens accept disjoint algorithm sets:
//! sessions are HMAC-signed with the local secret, while external tokens must
//! be verifiable with a public key alone. `none` is never accepted.
//!
//! # Security
//!
//! - Strict algorithm checks to prevent algorithm substitution attacks
//! - The bridge never accepts HMAC, so it never holds a provider signing secret
//! - An external token's algorithm must match the family of the key verifying it

use std::str::FromStr;

use jsonwebtoken::Algorithm;

use crate::error::AuthError;

/// Algorithms rejected by every verifier.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none"];

/// Algorithms the token authority may sign sessions with.
pub const SESSION_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Algorithms accepted on externally-issued tokens.
pub const EXTERNAL_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Public key family an asymmetric algorithm verifies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    /// RSA keys (`RS*`, `PS*`).
    Rsa,
    /// NIST elliptic-curve keys (`ES*`).
    Ec,
    /// Ed25519 keys (`EdDSA`).
    Ed,
}

impl KeyFamily {
    /// Returns the key family for an asymmetric algorithm, or `None` for HMAC.
    #[must_use]
    pub fn of(algorithm: Algorithm) -> Option<Self> {
        match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(Self::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Some(Self::Ec),
            Algorithm::EdDSA => Some(Self::Ed),
            _ => None,
        }
    }
}

/// Parses an algorithm name such as `HS256`.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] for `none` and for names
/// outside the JOSE registry subset this crate understands.
pub fn parse_algorithm(name: &str) -> Result<Algorithm, AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|forbidden| forbidden.eq_ignore_ascii_case(name)) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{name}' is not allowed for security reasons"
        )));
    }
    Algorithm::from_str(name)
        .map_err(|_| AuthError::unsupported_algorithm(format!("Unknown algorithm '{name}'")))
}

/// Validates an algorithm for session signing.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] unless `algorithm` is one of
/// [`SESSION_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use forge_authn::validation::validate_session_algorithm;
/// use jsonwebtoken::Algorithm;
///
/// assert!(validate_session_algorithm(Algorithm::HS256).is_ok());
/// assert!(validate_session_algorithm(Algorithm::RS256).is_err());
/// ```
pub fn validate_session_algorithm(algorithm: Algorithm) -> Result<(), AuthError> {
    if SESSION_ALGORITHMS.contains(&algorithm) {
        Ok(())
    } else {
        Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{algorithm:?}' cannot sign sessions (HS256, HS384 or HS512 only)"
        )))
    }
}

/// Validates the `alg` header of an externally-issued token.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] for `none`, for HMAC
/// algorithms, and for unknown names.
///
/// # Examples
///
/// ```
/// use forge_authn::validation::validate_external_algorithm;
///
/// assert!(validate_external_algorithm("RS256").is_ok());
/// assert!(validate_external_algorithm("HS256").is_err());
/// assert!(validate_external_algorithm("none").is_err());
/// ```
pub fn validate_external_algorithm(name: &str) -> Result<Algorithm, AuthError> {
    let algorithm = parse_algorithm(name)?;
    if EXTERNAL_ALGORITHMS.contains(&algorithm) {
        Ok(algorithm)
    } else {
        Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{name}' is symmetric and never accepted on external tokens"
        )))
    }
}
