//! Block implementation for the ledger
//!
//! A block is an ordered batch of transactions linked to its predecessor by
//! hash. The block hash is the SHA-256 of the bincode encoding of the block
//! with its `hash` field empty.

use crate::core::transaction::{Transaction, TransactionError};
use crate::crypto::sha256;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Block Errors
// =============================================================================

/// Block construction and decoding errors
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

/// A block in the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    /// Creation time (unix seconds)
    pub timestamp: i64,
    /// Hash of this block
    pub hash: Vec<u8>,
    /// Hash of the previous block (empty for genesis)
    pub prev_hash: Vec<u8>,
    /// Transactions in ledger order
    pub transactions: Vec<Transaction>,
    /// Block height (genesis is 0)
    pub height: u64,
}

/// Borrowed view hashed in place of the block, with `hash` always empty.
/// Field order and types must serialize identically to [`Block`].
#[derive(Serialize)]
struct HashView<'a> {
    timestamp: i64,
    hash: &'a [u8],
    prev_hash: &'a [u8],
    transactions: &'a [Transaction],
    height: u64,
}

impl Block {
    /// Create and seal a block on top of `prev_hash` at `height`
    pub fn new(
        prev_hash: Vec<u8>,
        height: u64,
        transactions: Vec<Transaction>,
    ) -> Result<Self, BlockError> {
        let mut block = Self {
            timestamp: Utc::now().timestamp(),
            hash: Vec::new(),
            prev_hash,
            transactions,
            height,
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    /// Create the genesis block paying the coinbase reward to `recipient`
    pub fn genesis(recipient: &[u8]) -> Result<Self, BlockError> {
        let coinbase = Transaction::coinbase(recipient, 0)?;
        Self::new(Vec::new(), 0, vec![coinbase])
    }

    /// Hash of the block contents
    pub fn compute_hash(&self) -> Result<Vec<u8>, BlockError> {
        let view = HashView {
            timestamp: self.timestamp,
            hash: &[],
            prev_hash: &self.prev_hash,
            transactions: &self.transactions,
            height: self.height,
        };
        Ok(sha256(&bincode::serialize(&view)?))
    }

    /// Verify the stored block hash
    pub fn verify_hash(&self) -> Result<bool, BlockError> {
        Ok(self.compute_hash()? == self.hash)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Serialize to the binary wire/disk format
    pub fn encode(&self) -> Result<Vec<u8>, BlockError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from the binary wire/disk format
    pub fn decode(data: &[u8]) -> Result<Self, BlockError> {
        Ok(bincode::deserialize(data)?)
    }

    /// Get number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}
