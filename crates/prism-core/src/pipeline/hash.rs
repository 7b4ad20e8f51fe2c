//! Content hashing for cache keys and object addresses.

use blake3::Hasher as Blake3Hasher;

/// BLAKE3 hex digest of an in-memory buffer.
pub fn content_hash_from_bytes(data: &[u8]) -> String {
    let mut hasher = Blake3Hasher::new();
    hasher.update(data);
    hasher.finalize().to_hex().to_string()
}
