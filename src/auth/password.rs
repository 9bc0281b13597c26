use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use tracing::warn;

use crate::error::{AppError, AppResult};

/// Argon2 PHC string for a PIN or device secret.
pub fn hash_secret(secret: &str) -> AppResult<String> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    argon2
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash secret: {}", e)))
}

/// `false` on mismatch and on an unparsable stored hash.
pub fn verify_secret(secret: &str, hashed: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hashed) else {
        warn!("Stored hash is not a valid PHC string");
        return false;
    };

    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_secret("1234").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_secret("1234", &hash));
        assert!(!verify_secret("4321", &hash));
        assert!(!verify_secret("1234", "not-a-hash"));
    }
}
