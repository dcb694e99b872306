//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (UTXO model with per-input signatures)
//! - Blocks (hash-linked batches of transactions)
//! - UTXO index (unspent outputs by transaction id)
//! - Blockchain (the persistent ledger store)

pub mod block;
pub mod blockchain;
pub mod transaction;
pub mod utxo;

pub use block::{Block, BlockError};
pub use blockchain::{Blockchain, BlockchainError, ChainIter};
pub use transaction::{
    build_transfer, ReferencedTxs, Transaction, TransactionError, TxInput, TxOutput,
    COINBASE_REWARD,
};
pub use utxo::{OutPoint, Spendable, UtxoRecord, UtxoSet};
