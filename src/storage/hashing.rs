//! Hashing used for transaction keys, Merkle nodes and address derivation

use sha2::{Digest, Sha256};

/// Calculate a single SHA256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let hash = Sha256::digest(data);
    let mut result = [0u8; 32];
    result.copy_from_slice(&hash);
    result
}

/// SHA256 over the concatenation of two digests (Merkle parent hash)
pub fn sha256_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut result = [0u8; 32];
    result.copy_from_slice(&hasher.finalize());
    result
}
