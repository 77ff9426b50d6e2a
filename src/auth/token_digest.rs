use sha2::{Digest, Sha256};

/// SHA-256 hex digest under which refresh and reset tokens are stored
pub(crate) fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
