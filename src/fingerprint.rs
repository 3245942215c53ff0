use sha2::{Digest, Sha256};

use crate::store::SecretSnapshot;

/// Hex characters kept from the digest. Short enough for status and
/// annotations, but no longer collision resistant in the cryptographic
/// sense; don't reuse it where that matters.
pub const FINGERPRINT_LEN: usize = 16;

/// SHA-256 over every key followed by its value, in key order, with no
/// separators, truncated to [`FINGERPRINT_LEN`].
pub fn fingerprint(snapshot: &SecretSnapshot) -> String {
    let mut hasher = Sha256::new();
    // BTreeMap iterates in lexicographic key order.
    for (key, value) in snapshot {
        hasher.update(key.as_bytes());
        hasher.update(value);
    }

    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(FINGERPRINT_LEN);
    digest
}
