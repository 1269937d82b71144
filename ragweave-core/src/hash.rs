//! SHA-256 helpers shared by cache keys, query hashes and checksums

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the input.
#[must_use]
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// First `len` hex characters of the SHA-256 of the input.
///
/// Used for privacy-preserving key prefixes (validation cache) and short
/// context hashes; `len` is clamped to the full digest width.
#[must_use]
pub fn sha256_prefix(data: &str, len: usize) -> String {
    let mut digest = sha256_hex(data);
    digest.truncate(len.min(64));
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_stable() {
        let a = sha256_hex("hello");
        let b = sha256_hex("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sha256_hex("hello "));
    }

    #[test]
    fn test_prefix() {
        let full = sha256_hex("abc");
        assert_eq!(sha256_prefix("abc", 8), &full[..8]);
        assert_eq!(sha256_prefix("abc", 999).len(), 64);
    }
}
