use sha2::{Digest, Sha256};

/// Hex digest of the salted password. The salt is a process-wide constant
/// shared with client verification paths, so both sides derive identical
/// hashes for the same credentials.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}
