//! Request signing and nonce generation for the relay protocol.
//!
//! The relay verifies `base64(HMAC-SHA256(secret, field_1 ‖ … ‖ field_n))`
//! over the raw UTF-8 bytes of each field, concatenated with no separators.
//! Field order and formatting are part of the wire contract.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const NONCE_SIZE: usize = 16;

/// `hmac` exposes key setup as fallible, so `sign` returns a `Result`.
/// HMAC itself takes keys of any length (long keys are hashed, short ones
/// padded), so with SHA-256 this error is not produced in practice.
#[derive(Debug)]
pub enum CryptoError {
    InvalidKey(&'static str),
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::InvalidKey(e) => write!(f, "invalid key: {e}"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Sign the concatenation of `parts` with `secret`. Any secret, including
/// an empty one, yields a signature; see [`CryptoError`].
pub fn sign(secret: &str, parts: &[&str]) -> Result<String, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| CryptoError::InvalidKey("hmac rejected secret"))?;
    for part in parts {
        mac.update(part.as_bytes());
    }
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Fresh single-use nonce, formatted as a random (version 4) UUID.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string()
}

/// Whether `nonce` has the hyphenated UUID form the relay expects.
pub fn is_valid_nonce(nonce: &str) -> bool {
    Uuid::parse_str(nonce).is_ok()
}
