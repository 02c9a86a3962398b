//! Random token generation and one-way hashing shared by sessions and OAuth.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Bytes of entropy in a session token.
pub const SESSION_TOKEN_BYTES: usize = 20;

/// Generate `len` bytes from the OS CSPRNG, encoded as unpadded base64url.
pub fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a fresh session token for a cookie.
pub fn generate_session_token() -> String {
    random_token(SESSION_TOKEN_BYTES)
}

/// Derive the store lookup key for a session token: lowercase hex SHA-256.
pub fn session_token_to_id(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
