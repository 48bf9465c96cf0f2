//! Hashing Utilities

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of content and return as hex string
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute the hash of `content` and compare it with `expected`
pub fn verify_content_hash(content: &str, expected: &str) -> bool {
    content_hash(content) == expected
}

/// Hash one link of an append-only chain.
///
/// The previous link's hash and the sequence number are folded in so that
/// editing, dropping or reordering a record breaks every later link.
pub fn hash_chain_link(previous: Option<&str>, sequence: u64, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(sequence.to_be_bytes());
    hasher.update(b"|");
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}
