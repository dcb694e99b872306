//! Blockchain implementation
//!
//! The ledger store: block bodies on disk, the hash index and tip pointer in
//! sled, and the UTXO index kept in step with every committed block.
//!
//! Writers (`append_block`, `accept_block`, `reindex`) are serialized by a
//! single lock. Readers go straight to storage and only ever see committed
//! state, since the tip, hash index and UTXO delta are written in one sled
//! transaction after the block body is already on disk.

use crate::core::block::{Block, BlockError};
use crate::core::transaction::{
    build_transfer, Transaction, TransactionError, COINBASE_REWARD,
};
use crate::core::utxo::{apply_block, OutPoint, UtxoSet};
use crate::crypto::{short_hex, KeyPair};
use crate::storage::{BlockStore, ChainDb, StorageConfig, StorageError};
use parking_lot::Mutex;
use std::collections::HashSet;
use thiserror::Error;

/// Blockchain-related errors
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Invalid block: {0}")]
    Validation(String),
    #[error("Block {0} is already in the chain")]
    DuplicateBlock(String),
    #[error("Expected block at height {expected}, got {got}")]
    UnexpectedHeight { expected: u64, got: u64 },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Block error: {0}")]
    Block(#[from] BlockError),
}

/// Map a transaction-level failure found while validating a block
fn reject(err: TransactionError) -> BlockchainError {
    match err {
        TransactionError::Storage(e) => BlockchainError::Storage(e),
        other => BlockchainError::Validation(other.to_string()),
    }
}

/// The ledger
pub struct Blockchain {
    config: StorageConfig,
    store: BlockStore,
    db: ChainDb,
    utxo: UtxoSet,
    write_lock: Mutex<()>,
}

impl Blockchain {
    fn open_storage(config: StorageConfig) -> Result<Self, StorageError> {
        let store = BlockStore::open(config.blocks_path())?;
        let db = ChainDb::open(config.db_path())?;
        let utxo = UtxoSet::new(db.chainstate().clone(), store.clone());
        Ok(Self {
            config,
            store,
            db,
            utxo,
            write_lock: Mutex::new(()),
        })
    }

    /// Create a new ledger whose genesis block pays `genesis_to`
    pub fn create(config: StorageConfig, genesis_to: &[u8]) -> Result<Self, BlockchainError> {
        let genesis = Block::genesis(genesis_to)?;
        Self::create_with_genesis(config, genesis)
    }

    /// Create a new ledger from an existing genesis block
    pub fn create_with_genesis(
        config: StorageConfig,
        genesis: Block,
    ) -> Result<Self, BlockchainError> {
        let chain = Self::open_storage(config)?;
        if chain.db.tip_height()?.is_some() {
            return Err(StorageError::AlreadyExists(chain.config.data_dir.clone()).into());
        }
        if genesis.height != 0 || !genesis.is_genesis() || !genesis.verify_hash()? {
            return Err(BlockchainError::Validation(
                "not a well-formed genesis block".to_string(),
            ));
        }

        chain.commit(&genesis)?;
        chain.utxo.reindex(chain.iter()?)?;

        log::info!(
            "Created ledger in {} with genesis {}",
            chain.config.data_dir.display(),
            short_hex(&genesis.hash)
        );
        Ok(chain)
    }

    /// Open an existing ledger
    pub fn open(config: StorageConfig) -> Result<Self, BlockchainError> {
        let chain = Self::open_storage(config)?;
        match chain.db.tip_height()? {
            Some(height) => {
                log::info!(
                    "Opened ledger in {} at height {}",
                    chain.config.data_dir.display(),
                    height
                );
                Ok(chain)
            }
            None => Err(StorageError::NotInitialised(chain.config.data_dir.clone()).into()),
        }
    }

    /// The UTXO index
    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    // =========================================================================
    // Tip and lookups
    // =========================================================================

    /// Current tip height
    pub fn tip_height(&self) -> Result<u64, BlockchainError> {
        self.db
            .tip_height()?
            .ok_or_else(|| StorageError::NotInitialised(self.config.data_dir.clone()).into())
    }

    /// Current tip height and hash
    pub fn tip(&self) -> Result<(u64, Vec<u8>), BlockchainError> {
        let height = self.tip_height()?;
        let block = self.store.read(height)?;
        Ok((height, block.hash))
    }

    /// Hash of the tip block
    pub fn tip_hash(&self) -> Result<Vec<u8>, BlockchainError> {
        Ok(self.tip()?.1)
    }

    /// Block at `height`, if the chain is that tall
    pub fn block_at(&self, height: u64) -> Result<Option<Block>, BlockchainError> {
        if height > self.tip_height()? {
            return Ok(None);
        }
        Ok(Some(self.store.read(height)?))
    }

    /// True if a block with this hash has been committed
    pub fn contains(&self, hash: &[u8]) -> Result<bool, BlockchainError> {
        Ok(self.db.height_of(hash)?.is_some())
    }

    /// Iterate blocks from the current tip back to genesis
    pub fn iter(&self) -> Result<ChainIter, StorageError> {
        let next = match self.db.tip_height()? {
            Some(height) => Some(self.store.read(height)?.hash),
            None => None,
        };
        Ok(ChainIter {
            store: self.store.clone(),
            db: self.db.clone(),
            next,
        })
    }

    /// Every block hash, tip first
    pub fn block_hashes(&self) -> Result<Vec<Vec<u8>>, BlockchainError> {
        let mut hashes = Vec::new();
        for block in self.iter()? {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Validate `transactions` and append them as a new block on the tip
    pub fn append_block(&self, transactions: Vec<Transaction>) -> Result<Block, BlockchainError> {
        let _guard = self.write_lock.lock();
        self.append_locked(transactions)
    }

    /// Append `transactions` followed by a coinbase paying `reward_to`
    pub fn append_with_reward(
        &self,
        mut transactions: Vec<Transaction>,
        reward_to: &[u8],
    ) -> Result<Block, BlockchainError> {
        let _guard = self.write_lock.lock();
        let height = self.tip_height()? + 1;
        transactions.push(Transaction::coinbase(reward_to, height)?);
        self.append_locked(transactions)
    }

    fn append_locked(&self, transactions: Vec<Transaction>) -> Result<Block, BlockchainError> {
        let (height, tip_hash) = self.tip()?;
        self.validate_transactions(&transactions, height + 1)?;

        let block = Block::new(tip_hash, height + 1, transactions)?;
        self.commit(&block)?;

        log::info!(
            "Appended block {} at height {} ({} transactions)",
            short_hex(&block.hash),
            block.height,
            block.tx_count()
        );
        Ok(block)
    }

    /// Apply a block produced elsewhere. It must extend the current tip.
    pub fn accept_block(&self, block: &Block) -> Result<(), BlockchainError> {
        let _guard = self.write_lock.lock();

        if self.contains(&block.hash)? {
            return Err(BlockchainError::DuplicateBlock(hex::encode(&block.hash)));
        }

        let (height, tip_hash) = self.tip()?;
        if block.height != height + 1 {
            return Err(BlockchainError::UnexpectedHeight {
                expected: height + 1,
                got: block.height,
            });
        }
        if block.prev_hash != tip_hash {
            return Err(BlockchainError::Validation(format!(
                "block {} does not extend tip {}",
                short_hex(&block.hash),
                short_hex(&tip_hash)
            )));
        }
        if !block.verify_hash()? {
            return Err(BlockchainError::Validation(format!(
                "block {} hash does not match its contents",
                short_hex(&block.hash)
            )));
        }

        self.validate_transactions(&block.transactions, block.height)?;
        self.commit(block)?;

        log::info!(
            "Accepted block {} at height {}",
            short_hex(&block.hash),
            block.height
        );
        Ok(())
    }

    /// Rebuild the UTXO index from the chain
    pub fn reindex(&self) -> Result<usize, BlockchainError> {
        let _guard = self.write_lock.lock();
        Ok(self.utxo.reindex(self.iter()?)?)
    }

    /// Transfer `amount` from `from` to `to`, paying the block reward back to
    /// the sender, and commit it as a new block
    pub fn send(&self, from: &KeyPair, to: &[u8], amount: u64) -> Result<Block, BlockchainError> {
        let tx = build_transfer(&self.utxo, from, to, amount)?;
        self.append_with_reward(vec![tx], &from.lock_hash())
    }

    /// Write the body, then publish tip, index and UTXO delta together
    fn commit(&self, block: &Block) -> Result<(), StorageError> {
        self.store.write(block)?;
        self.db
            .commit_block(block, |chainstate| apply_block(chainstate, block))
    }

    /// Checks every transaction of a block at `height` against the current
    /// UTXO index: ids match content and are new, signatures verify, no
    /// outpoint is spent twice, inputs cover outputs, and at most one
    /// coinbase, carrying `height` and paying the fixed reward.
    fn validate_transactions(
        &self,
        transactions: &[Transaction],
        height: u64,
    ) -> Result<(), BlockchainError> {
        let mut spent: HashSet<OutPoint> = HashSet::new();
        let mut ids: HashSet<&[u8]> = HashSet::new();
        let mut coinbases = 0;

        for tx in transactions {
            let id = short_hex(&tx.id);
            if !tx.has_valid_id()? {
                return Err(BlockchainError::Validation(format!(
                    "transaction {} id does not match its contents",
                    id
                )));
            }
            if !ids.insert(tx.id.as_slice()) || self.utxo.contains(&tx.id)? {
                return Err(BlockchainError::Validation(format!(
                    "transaction {} is already known",
                    id
                )));
            }
            let output_total = tx.total_output().map_err(reject)?;

            if tx.is_coinbase() {
                coinbases += 1;
                if coinbases > 1 {
                    return Err(BlockchainError::Validation(
                        "more than one coinbase transaction".to_string(),
                    ));
                }
                if tx.inputs[0].public_key != height.to_be_bytes() {
                    return Err(BlockchainError::Validation(format!(
                        "coinbase {} does not belong to height {}",
                        id, height
                    )));
                }
                if output_total != COINBASE_REWARD {
                    return Err(BlockchainError::Validation(format!(
                        "coinbase {} pays {} instead of {}",
                        id, output_total, COINBASE_REWARD
                    )));
                }
                continue;
            }

            let referenced = self.utxo.find_referenced_outputs(tx).map_err(reject)?;

            let mut input_total = 0u64;
            for input in &tx.inputs {
                let outpoint = OutPoint {
                    tx_id: input.tx_id.clone(),
                    index: input.output_index.unwrap_or(u32::MAX),
                };
                if !spent.insert(outpoint) {
                    return Err(BlockchainError::Validation(format!(
                        "transaction {} double-spends {}:{:?}",
                        id,
                        short_hex(&input.tx_id),
                        input.output_index
                    )));
                }
                let value = input
                    .output_index
                    .and_then(|index| referenced.get(&input.tx_id)?.outputs.get(index as usize))
                    .map(|output| output.value)
                    .unwrap_or(0);
                input_total = input_total
                    .checked_add(value)
                    .ok_or_else(|| reject(TransactionError::ValueOverflow))?;
            }

            if !tx.verify(&referenced).map_err(reject)? {
                return Err(BlockchainError::Validation(format!(
                    "transaction {} has an invalid signature",
                    id
                )));
            }
            if input_total < output_total {
                return Err(BlockchainError::Validation(format!(
                    "transaction {} spends {} but only has {}",
                    id, output_total, input_total
                )));
            }
        }

        Ok(())
    }
}

/// Lazy walk from a starting hash back to genesis.
/// Each call to [`Blockchain::iter`] starts a fresh walk at the tip.
pub struct ChainIter {
    store: BlockStore,
    db: ChainDb,
    next: Option<Vec<u8>>,
}

impl ChainIter {
    fn load(&self, hash: &[u8]) -> Result<Block, StorageError> {
        let height = self.db.height_of(hash)?.ok_or_else(|| {
            StorageError::InvalidData(format!("block {} not indexed", hex::encode(hash)))
        })?;
        let block = self.store.read(height)?;
        if block.hash != hash {
            return Err(StorageError::InvalidData(format!(
                "block file {} does not hold {}",
                height,
                hex::encode(hash)
            )));
        }
        Ok(block)
    }
}

impl Iterator for ChainIter {
    type Item = Result<Block, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        match self.load(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.next = Some(block.prev_hash.clone());
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{TxInput, TxOutput};
    use tempfile::TempDir;

    fn new_chain(owner: &KeyPair) -> (TempDir, Blockchain) {
        let dir = tempfile::tempdir().unwrap();
        let chain = Blockchain::create(StorageConfig::at(dir.path()), &owner.lock_hash()).unwrap();
        (dir, chain)
    }

    #[test]
    fn test_create_and_reopen() {
        let owner = KeyPair::generate();
        let dir = tempfile::tempdir().unwrap();
        let genesis_hash = {
            let chain =
                Blockchain::create(StorageConfig::at(dir.path()), &owner.lock_hash()).unwrap();
            assert_eq!(chain.tip_height().unwrap(), 0);
            chain.tip_hash().unwrap()
        };

        let chain = Blockchain::open(StorageConfig::at(dir.path())).unwrap();
        assert_eq!(chain.tip_hash().unwrap(), genesis_hash);
        assert_eq!(chain.utxo().balance(&owner.lock_hash()).unwrap(), COINBASE_REWARD);
    }

    #[test]
    fn test_open_missing_ledger() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Blockchain::open(StorageConfig::at(dir.path())),
            Err(BlockchainError::Storage(StorageError::NotInitialised(_)))
        ));
    }

    #[test]
    fn test_create_twice_fails() {
        let owner = KeyPair::generate();
        let dir = tempfile::tempdir().unwrap();
        drop(Blockchain::create(StorageConfig::at(dir.path()), &owner.lock_hash()).unwrap());
        assert!(matches!(
            Blockchain::create(StorageConfig::at(dir.path()), &owner.lock_hash()),
            Err(BlockchainError::Storage(StorageError::AlreadyExists(_)))
        ));
    }

    #[test]
    fn test_transfer_between_wallets() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);

        let block = chain.send(&a, &b.lock_hash(), 4).unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(block.tx_count(), 2);
        assert!(block.transactions[1].is_coinbase());

        // 10 - 4 change + 10 reward
        assert_eq!(chain.utxo().balance(&a.lock_hash()).unwrap(), 16);
        assert_eq!(chain.utxo().balance(&b.lock_hash()).unwrap(), 4);
    }

    #[test]
    fn test_insufficient_funds() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);

        assert!(matches!(
            chain.send(&a, &b.lock_hash(), 11),
            Err(BlockchainError::Transaction(
                TransactionError::InsufficientFunds { have: 10, need: 11 }
            ))
        ));
        assert_eq!(chain.tip_height().unwrap(), 0);
    }

    #[test]
    fn test_chain_linkage() {
        let a = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);
        for _ in 0..4 {
            chain.append_with_reward(Vec::new(), &a.lock_hash()).unwrap();
        }

        let blocks: Vec<Block> = chain.iter().unwrap().map(|b| b.unwrap()).collect();
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[0].hash, chain.tip_hash().unwrap());
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].prev_hash, pair[1].hash);
            assert_eq!(pair[0].height, pair[1].height + 1);
        }
        assert!(blocks[4].is_genesis());
        assert_eq!(chain.block_hashes().unwrap().len(), 5);
        assert!(chain.block_at(5).unwrap().is_none());
    }

    #[test]
    fn test_reindex_matches_incremental_updates() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);
        chain.send(&a, &b.lock_hash(), 4).unwrap();
        chain.send(&a, &b.lock_hash(), 12).unwrap();
        chain.send(&b, &a.lock_hash(), 3).unwrap();

        let before = chain.utxo().snapshot().unwrap();
        chain.reindex().unwrap();
        assert_eq!(chain.utxo().snapshot().unwrap(), before);
    }

    #[test]
    fn test_tampered_transaction_rejected() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);

        let mut tx = build_transfer(chain.utxo(), &a, &b.lock_hash(), 4).unwrap();
        tx.outputs[0].value = 9;
        assert!(matches!(
            chain.append_block(vec![tx]),
            Err(BlockchainError::Validation(_))
        ));
        assert_eq!(chain.tip_height().unwrap(), 0);
    }

    #[test]
    fn test_double_spend_in_block_rejected() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);

        let first = build_transfer(chain.utxo(), &a, &b.lock_hash(), 4).unwrap();
        let second = build_transfer(chain.utxo(), &a, &a.lock_hash(), 5).unwrap();
        assert!(matches!(
            chain.append_block(vec![first, second]),
            Err(BlockchainError::Validation(_))
        ));
    }

    #[test]
    fn test_spent_output_cannot_be_reused() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);

        let tx = build_transfer(chain.utxo(), &a, &b.lock_hash(), 4).unwrap();
        chain.append_block(vec![tx.clone()]).unwrap();
        assert!(matches!(
            chain.append_block(vec![tx]),
            Err(BlockchainError::Validation(_))
        ));
    }

    #[test]
    fn test_value_must_be_conserved() {
        let a = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);
        let genesis_tx = chain.block_at(0).unwrap().unwrap().transactions[0].clone();

        // Correctly signed, but creates more value than it spends
        let mut tx = Transaction::new(
            vec![TxInput::new(genesis_tx.id.clone(), 0, a.public_key_bytes())],
            vec![TxOutput::new(COINBASE_REWARD + 1, &a.lock_hash())],
        )
        .unwrap();
        let referenced = chain.utxo().find_referenced_outputs(&tx).unwrap();
        tx.sign(&a, &referenced).unwrap();
        assert!(tx.verify(&referenced).unwrap());

        assert!(matches!(
            chain.append_block(vec![tx]),
            Err(BlockchainError::Validation(_))
        ));
    }

    #[test]
    fn test_accept_block_from_peer() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let (_dir_x, source) = new_chain(&a);
        let dir_y = tempfile::tempdir().unwrap();
        let genesis = source.block_at(0).unwrap().unwrap();
        let replica = Blockchain::create_with_genesis(StorageConfig::at(dir_y.path()), genesis)
            .unwrap();

        let block = source.send(&a, &b.lock_hash(), 4).unwrap();
        replica.accept_block(&block).unwrap();
        assert_eq!(replica.tip_hash().unwrap(), source.tip_hash().unwrap());
        assert_eq!(replica.utxo().balance(&b.lock_hash()).unwrap(), 4);

        // Applying the same block again is refused
        assert!(matches!(
            replica.accept_block(&block),
            Err(BlockchainError::DuplicateBlock(_))
        ));
    }

    #[test]
    fn test_accept_block_out_of_order() {
        let a = KeyPair::generate();
        let (_dir_x, source) = new_chain(&a);
        let dir_y = tempfile::tempdir().unwrap();
        let genesis = source.block_at(0).unwrap().unwrap();
        let replica = Blockchain::create_with_genesis(StorageConfig::at(dir_y.path()), genesis)
            .unwrap();

        source.append_with_reward(Vec::new(), &a.lock_hash()).unwrap();
        let second = source.append_with_reward(Vec::new(), &a.lock_hash()).unwrap();
        assert!(matches!(
            replica.accept_block(&second),
            Err(BlockchainError::UnexpectedHeight { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn test_accept_block_with_bad_hash() {
        let a = KeyPair::generate();
        let (_dir_x, source) = new_chain(&a);
        let dir_y = tempfile::tempdir().unwrap();
        let genesis = source.block_at(0).unwrap().unwrap();
        let replica = Blockchain::create_with_genesis(StorageConfig::at(dir_y.path()), genesis)
            .unwrap();

        let mut block = source.append_with_reward(Vec::new(), &a.lock_hash()).unwrap();
        block.timestamp += 1;
        assert!(matches!(
            replica.accept_block(&block),
            Err(BlockchainError::Validation(_))
        ));
        assert_eq!(replica.tip_height().unwrap(), 0);
    }

    #[test]
    fn test_overflowing_coinbase_rejected() {
        let a = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);

        // u64::MAX + 11 wraps to the reward value
        let mut coinbase = Transaction::coinbase(&a.lock_hash(), 1).unwrap();
        coinbase.outputs = vec![
            TxOutput::new(u64::MAX, &a.lock_hash()),
            TxOutput::new(11, &a.lock_hash()),
        ];
        coinbase.id = coinbase.compute_id().unwrap();
        let block = Block::new(chain.tip_hash().unwrap(), 1, vec![coinbase]).unwrap();

        assert!(matches!(
            chain.accept_block(&block),
            Err(BlockchainError::Validation(_))
        ));
        assert_eq!(chain.tip_height().unwrap(), 0);
        assert_eq!(chain.utxo().balance(&a.lock_hash()).unwrap(), COINBASE_REWARD);
    }

    #[test]
    fn test_coinbase_bound_to_its_height() {
        let a = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);
        let first = chain.append_with_reward(Vec::new(), &a.lock_hash()).unwrap();

        let replay = Block::new(first.hash.clone(), 2, first.transactions.clone()).unwrap();
        assert!(matches!(
            chain.accept_block(&replay),
            Err(BlockchainError::Validation(_))
        ));

        let foreign = Transaction::coinbase(&a.lock_hash(), 7).unwrap();
        let misplaced = Block::new(first.hash.clone(), 2, vec![foreign]).unwrap();
        assert!(matches!(
            chain.accept_block(&misplaced),
            Err(BlockchainError::Validation(_))
        ));

        chain.append_with_reward(Vec::new(), &a.lock_hash()).unwrap();
        assert_eq!(chain.utxo().balance(&a.lock_hash()).unwrap(), 3 * COINBASE_REWARD);
    }

    #[test]
    fn test_duplicate_transaction_in_block_rejected() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);

        let tx = build_transfer(chain.utxo(), &a, &b.lock_hash(), 4).unwrap();
        assert!(matches!(
            chain.append_block(vec![tx.clone(), tx]),
            Err(BlockchainError::Validation(_))
        ));
        assert_eq!(chain.tip_height().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_appends_commit_one_spend() {
        let a = KeyPair::generate();
        let (_dir, chain) = new_chain(&a);

        // Every candidate spends the genesis output
        let candidates: Vec<Transaction> = (1..=8)
            .map(|amount| {
                build_transfer(chain.utxo(), &a, &KeyPair::generate().lock_hash(), amount)
                    .unwrap()
            })
            .collect();

        let results: Vec<Result<Block, BlockchainError>> = std::thread::scope(|scope| {
            let chain = &chain;
            let handles: Vec<_> = candidates
                .iter()
                .map(|tx| scope.spawn(move || chain.append_block(vec![tx.clone()])))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, BlockchainError::Validation(_))));
        assert_eq!(chain.tip_height().unwrap(), 1);

        let incremental = chain.utxo().snapshot().unwrap();
        chain.reindex().unwrap();
        assert_eq!(chain.utxo().snapshot().unwrap(), incremental);
    }
}
