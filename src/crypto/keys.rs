//! ECDSA key management for the ledger
//!
//! Provides key pair generation, signing, and verification using
//! the secp256k1 elliptic curve, plus Base58Check address handling.

use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

use super::hash::{double_sha256, lock_hash, LOCK_HASH_LEN};

/// Address version byte (mainnet-style)
pub const ADDRESS_VERSION: u8 = 0x00;

/// Number of checksum bytes appended to an address payload
pub const CHECKSUM_LEN: usize = 4;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Message digest must be 32 bytes, got {0}")]
    InvalidDigest(usize),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Raw compressed public key bytes, as stored on transaction inputs
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    /// Hash that locks outputs to this key
    pub fn lock_hash(&self) -> Vec<u8> {
        lock_hash(&self.public_key.serialize())
    }

    /// Base58Check address for this key
    pub fn address(&self) -> String {
        lock_hash_to_address(&self.lock_hash())
    }

    /// Sign a 32-byte digest with the private key
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, KeyError> {
        sign_digest(&self.secret_key, digest)
    }
}

/// Encode a locking hash as a Base58Check address
pub fn lock_hash_to_address(hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(1 + hash.len() + CHECKSUM_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(hash);
    let checksum = double_sha256(&payload);
    payload.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    bs58::encode(payload).into_string()
}

/// Decode a Base58Check address back to its locking hash
pub fn address_to_lock_hash(address: &str) -> Result<Vec<u8>, KeyError> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|e| KeyError::InvalidAddress(e.to_string()))?;

    if decoded.len() != 1 + LOCK_HASH_LEN + CHECKSUM_LEN {
        return Err(KeyError::InvalidAddress(format!(
            "unexpected length {}",
            decoded.len()
        )));
    }

    let (payload, checksum) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
    if double_sha256(payload)[..CHECKSUM_LEN] != *checksum {
        return Err(KeyError::InvalidAddress("checksum mismatch".to_string()));
    }
    if payload[0] != ADDRESS_VERSION {
        return Err(KeyError::InvalidAddress(format!(
            "unknown version byte {:#04x}",
            payload[0]
        )));
    }

    Ok(payload[1..].to_vec())
}

/// Parse a public key from its raw serialized bytes
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey, KeyError> {
    PublicKey::from_slice(bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Sign a 32-byte digest, producing a compact (r || s) signature
pub fn sign_digest(secret_key: &SecretKey, digest: &[u8]) -> Result<Vec<u8>, KeyError> {
    if digest.len() != 32 {
        return Err(KeyError::InvalidDigest(digest.len()));
    }
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest_slice(digest)?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    Ok(signature.serialize_compact().to_vec())
}

/// Verify a compact signature over a 32-byte digest.
///
/// A signature that cannot be parsed is reported as `Ok(false)`; only a
/// malformed digest is an error.
pub fn verify_digest(
    public_key: &PublicKey,
    digest: &[u8],
    signature: &[u8],
) -> Result<bool, KeyError> {
    if digest.len() != 32 {
        return Err(KeyError::InvalidDigest(digest.len()));
    }
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest_slice(digest)?;
    let sig = match Signature::from_compact(signature) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };

    Ok(secp.verify_ecdsa(&message, &sig, public_key).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert!(!kp.private_key_hex().is_empty());
        assert_eq!(kp.public_key_bytes().len(), 33);
        assert_eq!(kp.lock_hash().len(), LOCK_HASH_LEN);
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let digest = sha256(b"Hello, ledger!");

        let signature = kp.sign(&digest).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_digest(&kp.public_key, &digest, &signature).unwrap());

        let other = sha256(b"something else");
        assert!(!verify_digest(&kp.public_key, &other, &signature).unwrap());
    }

    #[test]
    fn test_garbage_signature_is_false() {
        let kp = KeyPair::generate();
        let digest = sha256(b"payload");
        assert!(!verify_digest(&kp.public_key, &digest, &[1, 2, 3]).unwrap());
    }

    #[test]
    fn test_digest_length_checked() {
        let kp = KeyPair::generate();
        assert!(matches!(kp.sign(b"short"), Err(KeyError::InvalidDigest(5))));
    }

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_hex(&kp1.private_key_hex()).unwrap();
        assert_eq!(kp1.public_key_bytes(), kp2.public_key_bytes());
        assert_eq!(kp1.address(), kp2.address());
    }

    #[test]
    fn test_address_round_trip() {
        let kp = KeyPair::generate();
        let address = kp.address();
        assert!(address.starts_with('1'));
        assert_eq!(address_to_lock_hash(&address).unwrap(), kp.lock_hash());
    }

    #[test]
    fn test_address_checksum_rejected() {
        let kp = KeyPair::generate();
        let mut raw = bs58::decode(kp.address()).into_vec().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = bs58::encode(raw).into_string();
        assert!(address_to_lock_hash(&tampered).is_err());
    }
}
