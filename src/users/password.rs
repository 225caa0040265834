use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

#[derive(Debug, thiserror::Error)]
#[error("password hashing failed: {0}")]
pub struct PasswordError(String);

/// Argon2id with default parameters and a fresh salt, PHC encoded.
pub fn hash_password(plain: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            PasswordError(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::{PasswordHash, PasswordVerifier};

    #[test]
    fn hash_verifies_against_original_password() {
        let hash = hash_password("Secur3P@ssw0rd!").expect("hashing should succeed");
        let parsed = PasswordHash::new(&hash).expect("hash is PHC encoded");
        assert!(Argon2::default()
            .verify_password(b"Secur3P@ssw0rd!", &parsed)
            .is_ok());
        assert!(Argon2::default()
            .verify_password(b"wrong-password", &parsed)
            .is_err());
    }

    #[test]
    fn hash_never_contains_plaintext() {
        let hash = hash_password("secret1").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(!hash.contains("secret1"));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password("correct-horse-battery-staple").unwrap();
        let b = hash_password("correct-horse-battery-staple").unwrap();
        assert_ne!(a, b);
    }
}
