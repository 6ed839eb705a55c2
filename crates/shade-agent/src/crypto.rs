//! cryptographic primitives for shade-agent
//!
//! - sha256 for seed mixing
//! - os randomness for local seeds

use rand::RngCore;
use sha2::{Digest, Sha256};

/// generate random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// sha256 over the concatenation of all parts
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
