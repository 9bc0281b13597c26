use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Recently verified device API keys.
///
/// Keyed by the SHA-256 of the presented key, never the key itself; the value
/// is the device id it authenticated as. A hit skips the argon2 verification.
#[derive(Clone)]
pub struct CredentialCache {
    cache: Cache<String, u64>,
}

fn fingerprint(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

impl CredentialCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(10_000) // kiosks, not users
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn lookup(&self, api_key: &str) -> Option<u64> {
        self.cache.get(&fingerprint(api_key)).await
    }

    pub async fn remember(&self, api_key: &str, device_id: u64) {
        self.cache.insert(fingerprint(api_key), device_id).await;
    }
}
