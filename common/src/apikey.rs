//! Developer API-key hashing. Station design note (spec §9): authentication
//! must not scan every developer row on each request. Callers index
//! developers by the hash produced here, turning lookup into a map get.

use sha2::{Digest, Sha256};

/// Stable, non-reversible hash of an API key suitable for use as a hash map
/// key or database index. Not a password hash: API keys are already
/// high-entropy random tokens, so a single SHA-256 pass is sufficient to
/// avoid storing the raw secret while keeping lookup O(1).
pub fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_hashes_identically() {
        assert_eq!(hash_api_key("secret-1"), hash_api_key("secret-1"));
    }

    #[test]
    fn different_keys_hash_differently() {
        assert_ne!(hash_api_key("secret-1"), hash_api_key("secret-2"));
    }
}
