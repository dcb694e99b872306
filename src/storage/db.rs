//! Chain index database
//!
//! A sled database with two trees:
//!
//! - `blocks`: block hash -> height (big-endian u64), plus the reserved key
//!   [`TIP_KEY`] holding the tip height.
//! - `chainstate`: transaction id -> bincode-encoded unspent-output record.
//!
//! Committing a block updates both trees in one sled transaction, so the tip
//! pointer, the hash index and the UTXO delta become visible together.

use crate::core::Block;
use crate::storage::StorageError;
use sled::transaction::{
    ConflictableTransactionResult, TransactionError as SledTxError, TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use std::path::Path;

/// Reserved key in the `blocks` tree holding the tip height
pub const TIP_KEY: &[u8] = b"l";

const BLOCKS_TREE: &str = "blocks";
const CHAINSTATE_TREE: &str = "chainstate";

/// Handle to the chain index database
#[derive(Debug, Clone)]
pub struct ChainDb {
    db: Db,
    blocks: Tree,
    chainstate: Tree,
}

impl ChainDb {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let chainstate = db.open_tree(CHAINSTATE_TREE)?;
        Ok(Self {
            db,
            blocks,
            chainstate,
        })
    }

    /// The UTXO tree
    pub fn chainstate(&self) -> &Tree {
        &self.chainstate
    }

    /// Current tip height, or `None` for an empty database
    pub fn tip_height(&self) -> Result<Option<u64>, StorageError> {
        self.blocks
            .get(TIP_KEY)?
            .map(|bytes| decode_height(&bytes))
            .transpose()
    }

    /// Height of the block with the given hash
    pub fn height_of(&self, hash: &[u8]) -> Result<Option<u64>, StorageError> {
        if hash == TIP_KEY {
            return Ok(None);
        }
        self.blocks
            .get(hash)?
            .map(|bytes| decode_height(&bytes))
            .transpose()
    }

    /// Atomically record `block` as the new tip.
    ///
    /// `apply_utxo` runs inside the same transaction against the chainstate
    /// tree; if it aborts, nothing is written.
    pub fn commit_block<F>(&self, block: &Block, apply_utxo: F) -> Result<(), StorageError>
    where
        F: Fn(&TransactionalTree) -> ConflictableTransactionResult<(), StorageError>,
    {
        let height = block.height.to_be_bytes();

        let result: Result<(), SledTxError<StorageError>> = (&self.blocks, &self.chainstate)
            .transaction(|(blocks, chainstate)| {
                apply_utxo(chainstate)?;
                blocks.insert(block.hash.as_slice(), &height[..])?;
                blocks.insert(TIP_KEY, &height[..])?;
                Ok(())
            });
        result.map_err(from_sled_tx)?;

        self.db.flush()?;
        Ok(())
    }
}

/// Unwrap a sled transaction error into the storage error it carries
pub fn from_sled_tx(err: SledTxError<StorageError>) -> StorageError {
    match err {
        SledTxError::Abort(e) => e,
        SledTxError::Storage(e) => StorageError::DbError(e),
    }
}

fn decode_height(bytes: &[u8]) -> Result<u64, StorageError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::InvalidData("invalid height bytes".to_string()))?;
    Ok(u64::from_be_bytes(raw))
}
