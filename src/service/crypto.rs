//! Template encryption at rest with AES-256-GCM.
//!
//! Sealed format: `nonce_12bytes || ciphertext || tag_16bytes`. A fresh random
//! nonce is drawn for every call. Keys are derived from a master secret per key
//! version, so a version tag stored beside each blob selects the key to open it
//! with and old versions can stay readable after rotation.

use std::collections::HashMap;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const KDF_LABEL: &[u8] = b"kiosk-template-key/";

/// Dimensionality of a face template. Enforced by callers.
pub const TEMPLATE_DIM: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Tag did not verify: corrupt data or wrong key. Nothing is returned.
    #[error("ciphertext failed authentication (corrupt data or wrong key)")]
    AuthenticationFailure,

    #[error("unknown key version: {0}")]
    UnknownKeyVersion(String),

    #[error("malformed payload: {0}")]
    Malformed(&'static str),

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    Seal,
}

struct DerivedKey {
    key: [u8; KEY_LEN],
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl DerivedKey {
    fn derive(master_secret: &[u8], key_version: &str) -> Result<Self, CryptoError> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(master_secret)
            .map_err(|_| CryptoError::KeyDerivation)?;
        mac.update(KDF_LABEL);
        mac.update(key_version.as_bytes());

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&mac.finalize().into_bytes());
        Ok(Self { key })
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::KeyDerivation)
    }
}

/// Output of a seal: the blob plus the version of the key that sealed it.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub key_version: String,
}

/// Stateless after construction; safe to share across threads.
pub struct TemplateCipher {
    current: String,
    keys: HashMap<String, DerivedKey>,
}

impl TemplateCipher {
    pub fn new(key_version: &str, master_secret: &str) -> Result<Self, CryptoError> {
        if master_secret.is_empty() {
            return Err(CryptoError::KeyDerivation);
        }
        let mut keys = HashMap::new();
        keys.insert(
            key_version.to_string(),
            DerivedKey::derive(master_secret.as_bytes(), key_version)?,
        );
        Ok(Self {
            current: key_version.to_string(),
            keys,
        })
    }

    /// Register a decrypt-only key for blobs sealed before a rotation.
    pub fn with_retired(mut self, key_version: &str, master_secret: &str) -> Result<Self, CryptoError> {
        if key_version != self.current {
            self.keys.insert(
                key_version.to_string(),
                DerivedKey::derive(master_secret.as_bytes(), key_version)?,
            );
        }
        Ok(self)
    }

    pub fn key_version(&self) -> &str {
        &self.current
    }

    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        let key = self
            .keys
            .get(&self.current)
            .ok_or_else(|| CryptoError::UnknownKeyVersion(self.current.clone()))?;
        let cipher = key.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(Sealed {
            ciphertext: sealed,
            key_version: self.current.clone(),
        })
    }

    pub fn decrypt_bytes(&self, sealed: &[u8], key_version: &str) -> Result<Vec<u8>, CryptoError> {
        let key = self
            .keys
            .get(key_version)
            .ok_or_else(|| CryptoError::UnknownKeyVersion(key_version.to_string()))?;

        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed("ciphertext too short"));
        }

        let cipher = key.cipher()?;
        let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);
        cipher
            .decrypt(nonce, &sealed[NONCE_LEN..])
            .map_err(|_| CryptoError::AuthenticationFailure)
    }

    /// Seal a float vector as little-endian f32s.
    pub fn encrypt_vector(&self, vector: &[f32]) -> Result<Sealed, CryptoError> {
        let mut bytes = Vec::with_capacity(vector.len() * 4);
        for value in vector {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let sealed = self.encrypt_bytes(&bytes);
        bytes.zeroize();
        sealed
    }

    pub fn decrypt_vector(&self, sealed: &[u8], key_version: &str) -> Result<Vec<f32>, CryptoError> {
        let mut bytes = self.decrypt_bytes(sealed, key_version)?;
        if bytes.len() % 4 != 0 {
            bytes.zeroize();
            return Err(CryptoError::Malformed("plaintext is not a whole number of f32s"));
        }
        let vector = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        bytes.zeroize();
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> TemplateCipher {
        TemplateCipher::new("v1", "correct horse battery staple").unwrap()
    }

    fn sample_vector() -> Vec<f32> {
        (0..TEMPLATE_DIM)
            .map(|i| ((i as f32) * 0.37).sin() / 3.0)
            .collect()
    }

    #[test]
    fn vector_round_trip_is_bit_exact() {
        let cipher = cipher();
        let mut v = sample_vector();
        v[0] = -0.0;
        v[1] = f32::MIN_POSITIVE;
        v[2] = f32::MAX;

        let sealed = cipher.encrypt_vector(&v).unwrap();
        assert_eq!(sealed.key_version, "v1");
        assert_eq!(sealed.ciphertext.len(), NONCE_LEN + TEMPLATE_DIM * 4 + TAG_LEN);

        let opened = cipher.decrypt_vector(&sealed.ciphertext, &sealed.key_version).unwrap();
        assert_eq!(opened.len(), TEMPLATE_DIM);
        for (a, b) in v.iter().zip(opened.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let cipher = cipher();
        let v = sample_vector();
        let a = cipher.encrypt_vector(&v).unwrap();
        let b = cipher.encrypt_vector(&v).unwrap();
        assert_ne!(a.ciphertext[..NONCE_LEN], b.ciphertext[..NONCE_LEN]);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn any_flipped_bit_fails_authentication() {
        let cipher = cipher();
        let sealed = cipher.encrypt_vector(&sample_vector()).unwrap();

        // nonce, body and tag positions
        let positions = [0, NONCE_LEN - 1, NONCE_LEN, NONCE_LEN + 700, sealed.ciphertext.len() - 1];
        for pos in positions {
            for bit in [0u8, 3, 7] {
                let mut tampered = sealed.ciphertext.clone();
                tampered[pos] ^= 1 << bit;
                assert_eq!(
                    cipher.decrypt_vector(&tampered, "v1"),
                    Err(CryptoError::AuthenticationFailure),
                    "byte {pos} bit {bit}"
                );
            }
        }
    }

    #[test]
    fn wrong_master_secret_fails_authentication() {
        let sealed = cipher().encrypt_bytes(b"payload").unwrap();
        let other = TemplateCipher::new("v1", "a different secret").unwrap();
        assert_eq!(
            other.decrypt_bytes(&sealed.ciphertext, "v1"),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn unknown_version_and_truncation_are_distinct() {
        let cipher = cipher();
        let sealed = cipher.encrypt_bytes(b"payload").unwrap();
        assert_eq!(
            cipher.decrypt_bytes(&sealed.ciphertext, "v7"),
            Err(CryptoError::UnknownKeyVersion("v7".into()))
        );
        assert!(matches!(
            cipher.decrypt_bytes(&sealed.ciphertext[..10], "v1"),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn retired_keys_still_open_old_blobs() {
        let old = TemplateCipher::new("v1", "old secret").unwrap();
        let sealed = old.encrypt_bytes(b"enrolled before rotation").unwrap();

        let rotated = TemplateCipher::new("v2", "new secret")
            .unwrap()
            .with_retired("v1", "old secret")
            .unwrap();
        assert_eq!(rotated.key_version(), "v2");
        assert_eq!(
            rotated.decrypt_bytes(&sealed.ciphertext, "v1").unwrap(),
            b"enrolled before rotation"
        );
        assert_eq!(rotated.encrypt_bytes(b"x").unwrap().key_version, "v2");
    }

    #[test]
    fn odd_length_plaintext_is_not_a_vector() {
        let cipher = cipher();
        let sealed = cipher.encrypt_bytes(&[1, 2, 3]).unwrap();
        assert!(matches!(
            cipher.decrypt_vector(&sealed.ciphertext, "v1"),
            Err(CryptoError::Malformed(_))
        ));
    }
}
