//! Argon2 password hashing

use argon2::Argon2;
use argon2::password_hash::PasswordHash;
use argon2::password_hash::PasswordHasher;
use argon2::password_hash::PasswordVerifier;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;

/// Generate a random secret
///
/// Used for the throwaway JWT secret when none is configured.
pub fn generate() -> String {
    SaltString::generate(&mut OsRng).to_string()
}

/// Hash a password with a fresh salt
pub fn hash(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("Argon2 hash")
        .to_string()
}

/// Check a password against a stored hash
pub fn verify(hashed_password: &str, password: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hashed_password) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_roundtrip() {
        let hashed = hash("verysecret");

        assert!(verify(&hashed, "verysecret"));
        assert!(!verify(&hashed, "verypublic"));
    }

    #[test]
    fn test_verify_rejects_garbage_hashes() {
        assert!(!verify("not a phc string", "verysecret"));
    }
}
