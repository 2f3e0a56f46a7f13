//! Sentence fingerprints: the cache key of a sentence inside a namespace.
//!
//! The fingerprint depends on the sentence text only (voice and language are
//! part of the namespace), and must stay stable across process restarts so a
//! persistent cache remains addressable.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the UTF-8 bytes of `sentence`.
pub fn fingerprint(sentence: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sentence.as_bytes());
    hex::encode(hasher.finalize())
}
