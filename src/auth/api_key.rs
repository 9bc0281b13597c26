//! Structured device API keys: `"<device id>.<secret>"`.
//!
//! The id prefix gives an O(1) lookup; only the argon2 hash of the secret is
//! stored, so the slow hash still guards the credential.

use rand::RngCore;

const SECRET_BYTES: usize = 32;

pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn format_key(device_id: u64, secret: &str) -> String {
    format!("{}.{}", device_id, secret)
}

/// `None` when the key is not of the `id.secret` shape.
pub fn parse_key(api_key: &str) -> Option<(u64, &str)> {
    let (id, secret) = api_key.trim().split_once('.')?;
    if secret.is_empty() {
        return None;
    }
    Some((id.parse().ok()?, secret))
}
