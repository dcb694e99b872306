//! Mini-Ledger: a single-node UTXO ledger in Rust
//!
//! This crate provides:
//! - An append-only chain of blocks persisted to disk
//! - A UTXO index kept in step with the chain, rebuildable on demand
//! - ECDSA transaction signing and verification (secp256k1)
//! - Base58Check addresses and JSON wallet files
//! - A peer-to-peer protocol that brings lagging nodes up to date
//!
//! # Example
//!
//! ```no_run
//! use mini_ledger::core::Blockchain;
//! use mini_ledger::storage::StorageConfig;
//! use mini_ledger::wallet::Wallet;
//!
//! let alice = Wallet::new();
//! let bob = Wallet::new();
//!
//! // Genesis pays the block reward to Alice
//! let chain = Blockchain::create(StorageConfig::at("/tmp/ledger"), &alice.lock_hash()).unwrap();
//!
//! // Transfer 4 coins; Alice also collects the reward for the new block
//! chain.send(alice.key_pair(), &bob.lock_hash(), 4).unwrap();
//!
//! println!("Bob has {} coins", chain.utxo().balance(&bob.lock_hash()).unwrap());
//! ```

pub mod cli;
pub mod core;
pub mod crypto;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-export commonly used types
pub use self::core::{Block, Blockchain, Transaction, UtxoSet, COINBASE_REWARD};
pub use crypto::KeyPair;
pub use network::{Node, NodeConfig};
pub use storage::StorageConfig;
pub use wallet::Wallet;
