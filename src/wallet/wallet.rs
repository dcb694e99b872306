//! Wallet implementation for the ledger
//!
//! A wallet is a single key pair persisted as a JSON file named after its
//! address. The ledger only ever sees the key pair and its lock hash.

use crate::crypto::{address_to_lock_hash, KeyError, KeyPair};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Wallet-related errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("No wallet for address {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

/// Serializable wallet data for persistence
#[derive(Debug, Serialize, Deserialize)]
struct WalletData {
    private_key_hex: String,
    address: String,
    label: Option<String>,
}

/// A key pair with an optional label
pub struct Wallet {
    key_pair: KeyPair,
    pub label: Option<String>,
}

impl Wallet {
    /// Create a new wallet with a fresh key pair
    pub fn new() -> Self {
        Self {
            key_pair: KeyPair::generate(),
            label: None,
        }
    }

    pub fn with_label(label: &str) -> Self {
        Self {
            key_pair: KeyPair::generate(),
            label: Some(label.to_string()),
        }
    }

    /// Import a wallet from a hex private key
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, WalletError> {
        Ok(Self {
            key_pair: KeyPair::from_private_key_hex(private_key_hex)?,
            label: None,
        })
    }

    pub fn address(&self) -> String {
        self.key_pair.address()
    }

    /// Hash that outputs paying this wallet are locked with
    pub fn lock_hash(&self) -> Vec<u8> {
        self.key_pair.lock_hash()
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Save wallet to file
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let data = WalletData {
            private_key_hex: self.key_pair.private_key_hex(),
            address: self.address(),
            label: self.label.clone(),
        };

        fs::write(path, serde_json::to_string_pretty(&data)?)?;
        Ok(())
    }

    /// Load wallet from file
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let json = fs::read_to_string(path)?;
        let data: WalletData = serde_json::from_str(&json)?;

        let mut wallet = Self::from_private_key(&data.private_key_hex)?;
        wallet.label = data.label;
        Ok(wallet)
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Wallet files under one directory, one `<address>.json` per wallet
pub struct WalletManager {
    wallets_dir: PathBuf,
}

impl WalletManager {
    pub fn new(wallets_dir: &Path) -> Result<Self, WalletError> {
        fs::create_dir_all(wallets_dir)?;
        Ok(Self {
            wallets_dir: wallets_dir.to_path_buf(),
        })
    }

    /// Create and save a new wallet
    pub fn create_wallet(&self, label: Option<&str>) -> Result<Wallet, WalletError> {
        let wallet = match label {
            Some(l) => Wallet::with_label(l),
            None => Wallet::new(),
        };
        wallet.save(&self.path_for(&wallet.address()))?;
        Ok(wallet)
    }

    /// Addresses of every readable wallet file, sorted
    pub fn list_wallets(&self) -> Result<Vec<String>, WalletError> {
        let mut addresses = Vec::new();

        for entry in fs::read_dir(&self.wallets_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match Wallet::load(&path) {
                    Ok(wallet) => addresses.push(wallet.address()),
                    Err(e) => log::warn!("Skipping wallet file {:?}: {}", path, e),
                }
            }
        }

        addresses.sort();
        Ok(addresses)
    }

    /// Load a wallet by address
    pub fn load_wallet(&self, address: &str) -> Result<Wallet, WalletError> {
        // Reject malformed addresses before touching the filesystem
        address_to_lock_hash(address)?;

        let path = self.path_for(address);
        if !path.exists() {
            return Err(WalletError::NotFound(address.to_string()));
        }
        Wallet::load(&path)
    }

    fn path_for(&self, address: &str) -> PathBuf {
        self.wallets_dir.join(format!("{}.json", address))
    }
}
