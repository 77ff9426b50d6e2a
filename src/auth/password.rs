/// Password Hashing and Verification
///
/// PBKDF2-HMAC-SHA512 with a per-user random salt. The parameters are
/// fixed for the whole process so verification is a re-derivation plus
/// a constant-time comparison.

use constant_time_eq::constant_time_eq;
use rand::RngCore;
use sha2::Sha512;

use crate::error::AppError;

pub const PBKDF2_ITERATIONS: u32 = 1000;
const DIGEST_LENGTH: usize = 64;
const SALT_LENGTH: usize = 16;

/// Generate a fresh salt: 16 random bytes, hex encoded
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Derive the hex digest of `password` under `salt`
///
/// Deterministic: the same inputs always produce the same digest.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut digest = [0u8; DIGEST_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha512>(
        password.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut digest,
    );
    hex::encode(digest)
}

/// Re-derive and compare against a stored digest
pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    let candidate = hash_password(password, salt);
    constant_time_eq(candidate.as_bytes(), expected_hash.as_bytes())
}

/// Salt and digest for a new or changed password
pub struct HashedPassword {
    pub salt: String,
    pub hash: String,
}

/// Hash `password` under a fresh salt on the blocking pool
///
/// Key derivation is CPU bound and must stay off the async workers.
pub async fn hash_new_password(password: String) -> Result<HashedPassword, AppError> {
    tokio::task::spawn_blocking(move || {
        let salt = generate_salt();
        let hash = hash_password(&password, &salt);
        HashedPassword { salt, hash }
    })
    .await
    .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))
}

/// `verify_password` on the blocking pool
pub async fn verify_password_offloaded(
    password: String,
    salt: String,
    expected_hash: String,
) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &salt, &expected_hash))
        .await
        .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let salt = generate_salt();
        let first = hash_password("longenough1", &salt);
        let second = hash_password("longenough1", &salt);
        assert_eq!(first, second);
    }

    #[test]
    fn test_hash_shape() {
        let hash = hash_password("longenough1", "00112233445566778899aabbccddeeff");
        // 64-byte digest, hex encoded
        assert_eq!(hash.len(), 128);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, "longenough1");
    }

    #[test]
    fn test_known_answer() {
        // Published PBKDF2-HMAC-SHA512 vector: "password" / "salt", 1 iteration
        let mut digest = [0u8; 64];
        pbkdf2::pbkdf2_hmac::<Sha512>(b"password", b"salt", 1, &mut digest);
        assert_eq!(hex::encode(&digest[..8]), "867f70cf1ade02cf");
    }

    #[test]
    fn test_salt_changes_digest() {
        let a = hash_password("longenough1", &generate_salt());
        let b = hash_password("longenough1", &generate_salt());
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_salt() {
        let salt = generate_salt();
        assert_eq!(salt.len(), 32);
        assert!(salt.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(salt, generate_salt());
    }

    #[test]
    fn test_verify_password() {
        let salt = generate_salt();
        let hash = hash_password("longenough1", &salt);

        assert!(verify_password("longenough1", &salt, &hash));
        assert!(!verify_password("longenough2", &salt, &hash));
        assert!(!verify_password("", &salt, &hash));
        assert!(!verify_password("longenough1", &generate_salt(), &hash));
    }

    #[tokio::test]
    async fn test_offloaded_hash_and_verify() {
        let hashed = hash_new_password("longenough1".to_string()).await.unwrap();
        assert_eq!(hashed.hash, hash_password("longenough1", &hashed.salt));

        let ok = verify_password_offloaded(
            "longenough1".to_string(),
            hashed.salt.clone(),
            hashed.hash.clone(),
        )
        .await
        .unwrap();
        assert!(ok);

        let wrong = verify_password_offloaded("nope-nope".to_string(), hashed.salt, hashed.hash)
            .await
            .unwrap();
        assert!(!wrong);
    }
}
