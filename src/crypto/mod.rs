//! Cryptographic utilities for the ledger
//!
//! This module provides:
//! - SHA-256 hashing and locking-hash derivation
//! - ECDSA key management (secp256k1)
//! - Base58Check address encoding

pub mod hash;
pub mod keys;

pub use hash::{double_sha256, lock_hash, sha256, sha256_hex, short_hex, LOCK_HASH_LEN};
pub use keys::{
    address_to_lock_hash, lock_hash_to_address, public_key_from_bytes, sign_digest,
    verify_digest, KeyError, KeyPair,
};
