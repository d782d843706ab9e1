//! Fuzz target for JWT parsing and signature verification.
//!
//! Feeds arbitrary byte strings as tokens to the header decoder and the
//! session signature check. Every result must be either `Ok(...)` or
//! `Err(AuthError)`.

#![no_main]

use jsonwebtoken::{Algorithm, DecodingKey};
use libfuzzer_sys::fuzz_target;

use forge_authn::{
    SessionClaims,
    jwt::{decode_jwt_header, verify_signature},
    validation::{parse_algorithm, validate_session_algorithm},
};

fuzz_target!(|data: &[u8]| {
    // Tokens are always UTF-8
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(header) = decode_jwt_header(token)
        && let Ok(algorithm) = parse_algorithm(&header.alg)
    {
        let _ = validate_session_algorithm(algorithm);
    }

    let key = DecodingKey::from_secret(b"fuzz-session-secret");
    let _ = verify_signature::<SessionClaims>(token, &key, Algorithm::HS256);
});
