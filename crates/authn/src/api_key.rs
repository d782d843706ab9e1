//! Forge API keys.
//!
//! An API key is `forge-` followed by 36 lowercase hex characters (18 random
//! bytes). Keys are bearer credentials: callers store them sealed in the
//! secret vault and never log them.

use rand::RngCore;
use zeroize::Zeroizing;

/// Prefix of every Forge API key.
pub const API_KEY_PREFIX: &str = "forge-";

/// Random bytes behind each key.
pub const API_KEY_ENTROPY_BYTES: usize = 18;

/// Length of a generated key.
pub const API_KEY_LENGTH: usize = API_KEY_PREFIX.len() + API_KEY_ENTROPY_BYTES * 2;

/// Generates a new API key.
///
/// ```
/// use forge_authn::api_key::{generate_forge_api_key, is_forge_api_key};
///
/// let key = generate_forge_api_key();
/// assert!(is_forge_api_key(&key));
/// ```
#[must_use]
pub fn generate_forge_api_key() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; API_KEY_ENTROPY_BYTES]);
    rand::thread_rng().fill_bytes(&mut *bytes);
    Zeroizing::new(format!("{API_KEY_PREFIX}{}", hex::encode(&*bytes)))
}

/// Returns `true` if `candidate` has the shape of a generated key.
#[must_use]
pub fn is_forge_api_key(candidate: &str) -> bool {
    candidate.len() == API_KEY_LENGTH
        && candidate.strip_prefix(API_KEY_PREFIX).is_some_and(|body| {
            body.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        })
}
