//! Hashing utilities for the ledger
//!
//! SHA-256 is used for block hashes, transaction ids and signing digests.
//! Locking hashes (the "owner" of an output) are RIPEMD160(SHA256(pubkey)).

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Length in bytes of a locking hash
pub const LOCK_HASH_LEN: usize = 20;

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes double SHA-256 hash (SHA-256 of SHA-256)
/// Used for address checksums
pub fn double_sha256(data: &[u8]) -> Vec<u8> {
    sha256(&sha256(data))
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Derive the locking hash for a serialized public key
pub fn lock_hash(public_key: &[u8]) -> Vec<u8> {
    let mut ripemd = Ripemd160::new();
    ripemd.update(sha256(public_key));
    ripemd.finalize().to_vec()
}

/// Short hex prefix for log lines
pub fn short_hex(hash: &[u8]) -> String {
    let full = hex::encode(hash);
    if full.len() > 16 {
        full[..16].to_string()
    } else {
        full
    }
}
