//! Deterministic registration ids.
//!
//! Ids are a prefix plus a truncated SHA-256 over the identity fields, so
//! rediscovering the same entity always yields the same id.

use sha2::{Digest, Sha256};

/// Hex characters kept from the digest.
const ID_HEX_LEN: usize = 32;

/// Derive an id from a prefix and the identity fields of an entity.
///
/// Parts are separated by a NUL byte, so `("ab", "c")` and `("a", "bc")`
/// hash differently.
pub fn derive_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", prefix, &digest[..ID_HEX_LEN])
}
