//! PKCE (RFC 7636) and `state` parameter generation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::crypto::random_token;

/// Random bytes behind each `state` and code verifier.
pub const FLOW_SECRET_BYTES: usize = 32;

/// Generate the anti-CSRF `state` parameter.
pub fn generate_state() -> String {
    random_token(FLOW_SECRET_BYTES)
}

/// Generate a PKCE code verifier (43 characters).
pub fn generate_code_verifier() -> String {
    random_token(FLOW_SECRET_BYTES)
}

/// S256 challenge: `BASE64URL(SHA256(verifier))`.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
