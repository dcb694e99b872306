//! Unspent transaction output index
//!
//! The chainstate tree maps each transaction id to the outputs of that
//! transaction that have not been spent yet, together with the height of the
//! block that contains it. Outputs are kept under their original index so a
//! partial spend never renumbers the rest.

use crate::core::block::Block;
use crate::core::transaction::{ReferencedTxs, Transaction, TransactionError, TxOutput};
use crate::storage::db::from_sled_tx;
use crate::storage::{BlockStore, StorageError};
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::{Batch, Tree};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Reference to a single transaction output
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub tx_id: Vec<u8>,
    pub index: u32,
}

/// Unspent outputs of one transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UtxoRecord {
    /// Height of the block containing the transaction
    pub height: u64,
    /// Remaining outputs keyed by their original index
    pub outputs: BTreeMap<u32, TxOutput>,
}

impl UtxoRecord {
    /// Record holding every output of `tx`
    fn from_transaction(tx: &Transaction, height: u64) -> Self {
        Self {
            height,
            outputs: tx
                .outputs
                .iter()
                .enumerate()
                .map(|(index, output)| (index as u32, output.clone()))
                .collect(),
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Outputs selected to fund a transfer
#[derive(Debug, Clone, Default)]
pub struct Spendable {
    pub accumulated: u64,
    pub selection: Vec<OutPoint>,
}

/// View over the chainstate tree
#[derive(Debug, Clone)]
pub struct UtxoSet {
    chainstate: Tree,
    blocks: BlockStore,
}

impl UtxoSet {
    pub fn new(chainstate: Tree, blocks: BlockStore) -> Self {
        Self { chainstate, blocks }
    }

    /// Iterate decoded records in key (transaction id) order
    fn records(&self) -> impl Iterator<Item = Result<(Vec<u8>, UtxoRecord), StorageError>> + '_ {
        self.chainstate.iter().map(|entry| {
            let (key, value) = entry?;
            Ok((key.to_vec(), UtxoRecord::decode(&value)?))
        })
    }

    fn record(&self, tx_id: &[u8]) -> Result<Option<UtxoRecord>, StorageError> {
        self.chainstate
            .get(tx_id)?
            .map(|bytes| UtxoRecord::decode(&bytes))
            .transpose()
    }

    /// Rebuild the index from scratch by walking the chain from tip to
    /// genesis. Returns the number of transactions with unspent outputs.
    pub fn reindex<I>(&self, chain: I) -> Result<usize, StorageError>
    where
        I: IntoIterator<Item = Result<Block, StorageError>>,
    {
        let mut spent: HashMap<Vec<u8>, HashSet<u32>> = HashMap::new();
        let mut records: BTreeMap<Vec<u8>, UtxoRecord> = BTreeMap::new();

        for block in chain {
            let block = block?;

            // Later blocks are seen first, so their spends are already known
            for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                for input in &tx.inputs {
                    if let Some(index) = input.output_index {
                        spent.entry(input.tx_id.clone()).or_default().insert(index);
                    }
                }
            }

            for tx in &block.transactions {
                let mut record = UtxoRecord::from_transaction(tx, block.height);
                if let Some(used) = spent.get(&tx.id) {
                    record.outputs.retain(|index, _| !used.contains(index));
                }
                if !record.outputs.is_empty() {
                    records.insert(tx.id.clone(), record);
                }
            }
        }

        let mut batch = Batch::default();
        for key in self.chainstate.iter().keys() {
            let key = key?;
            if !records.contains_key(&key[..]) {
                batch.remove(key);
            }
        }
        for (tx_id, record) in &records {
            batch.insert(tx_id.as_slice(), record.encode()?);
        }
        self.chainstate.apply_batch(batch)?;

        log::info!("Reindexed UTXO set: {} transactions", records.len());
        Ok(records.len())
    }

    /// Select unspent outputs locked to `owner` until their value reaches
    /// `amount`. Selection follows transaction id order, then output index.
    pub fn find_spendable(&self, owner: &[u8], amount: u64) -> Result<Spendable, TransactionError> {
        let mut spendable = Spendable::default();

        'outer: for entry in self.records() {
            let (tx_id, record) = entry?;
            for (index, output) in &record.outputs {
                if spendable.accumulated >= amount {
                    break 'outer;
                }
                if output.is_locked_with(owner) {
                    spendable.accumulated = spendable
                        .accumulated
                        .checked_add(output.value)
                        .ok_or(TransactionError::ValueOverflow)?;
                    spendable.selection.push(OutPoint {
                        tx_id: tx_id.clone(),
                        index: *index,
                    });
                }
            }
        }

        if spendable.accumulated < amount {
            return Err(TransactionError::InsufficientFunds {
                have: spendable.accumulated,
                need: amount,
            });
        }
        Ok(spendable)
    }

    /// All unspent outputs locked to `owner`
    pub fn find_unspent(&self, owner: &[u8]) -> Result<Vec<(OutPoint, TxOutput)>, StorageError> {
        let mut found = Vec::new();
        for entry in self.records() {
            let (tx_id, record) = entry?;
            for (index, output) in record.outputs {
                if output.is_locked_with(owner) {
                    let outpoint = OutPoint {
                        tx_id: tx_id.clone(),
                        index,
                    };
                    found.push((outpoint, output));
                }
            }
        }
        Ok(found)
    }

    /// Sum of unspent outputs locked to `owner`
    pub fn balance(&self, owner: &[u8]) -> Result<u64, StorageError> {
        self.find_unspent(owner)?
            .iter()
            .try_fold(0u64, |total, (_, output)| total.checked_add(output.value))
            .ok_or_else(|| StorageError::InvalidData("unspent balance overflows".to_string()))
    }

    /// True if `tx_id` still has unspent outputs
    pub fn contains(&self, tx_id: &[u8]) -> Result<bool, StorageError> {
        Ok(self.chainstate.contains_key(tx_id)?)
    }

    /// Load a transaction from the block recorded at `height`
    pub fn find_transaction(&self, tx_id: &[u8], height: u64) -> Result<Transaction, StorageError> {
        let block = self.blocks.read(height)?;
        block
            .transactions
            .into_iter()
            .find(|tx| tx.id == tx_id)
            .ok_or_else(|| {
                StorageError::InvalidData(format!(
                    "transaction {} not in block {}",
                    hex::encode(tx_id),
                    height
                ))
            })
    }

    /// Resolve the prior transactions spent by `tx`. Every input must name an
    /// output that is still unspent.
    pub fn find_referenced_outputs(&self, tx: &Transaction) -> Result<ReferencedTxs, TransactionError> {
        let mut referenced = ReferencedTxs::new();
        if tx.is_coinbase() {
            return Ok(referenced);
        }

        for input in &tx.inputs {
            let index = input
                .output_index
                .ok_or_else(|| TransactionError::missing(&input.tx_id, u32::MAX))?;
            let record = self
                .record(&input.tx_id)?
                .filter(|record| record.outputs.contains_key(&index))
                .ok_or_else(|| TransactionError::missing(&input.tx_id, index))?;

            if !referenced.contains_key(&input.tx_id) {
                let prev = self.find_transaction(&input.tx_id, record.height)?;
                referenced.insert(input.tx_id.clone(), prev);
            }
        }

        Ok(referenced)
    }

    /// Apply a block's spends and new outputs in a standalone transaction
    pub fn update(&self, block: &Block) -> Result<(), StorageError> {
        self.chainstate
            .transaction(|chainstate| apply_block(chainstate, block))
            .map_err(from_sled_tx)
    }

    /// Number of transactions with unspent outputs
    pub fn transaction_count(&self) -> usize {
        self.chainstate.len()
    }

    /// Full copy of the index, keyed by transaction id
    pub fn snapshot(&self) -> Result<BTreeMap<Vec<u8>, UtxoRecord>, StorageError> {
        self.records().collect()
    }
}

fn abort(err: StorageError) -> ConflictableTransactionError<StorageError> {
    ConflictableTransactionError::Abort(err)
}

/// Remove the outputs `block` spends, then add every output it creates.
/// Aborts if an input names an output that is not unspent, or if a created
/// transaction id already has a record.
pub fn apply_block(
    chainstate: &TransactionalTree,
    block: &Block,
) -> ConflictableTransactionResult<(), StorageError> {
    for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
        for input in &tx.inputs {
            let missing = || {
                abort(StorageError::InvariantViolation(format!(
                    "input {}:{:?} of {} is not unspent",
                    hex::encode(&input.tx_id),
                    input.output_index,
                    hex::encode(&tx.id)
                )))
            };

            let index = input.output_index.ok_or_else(missing)?;
            let bytes = chainstate.get(input.tx_id.as_slice())?.ok_or_else(missing)?;
            let mut record = UtxoRecord::decode(&bytes).map_err(abort)?;
            if record.outputs.remove(&index).is_none() {
                return Err(missing());
            }

            if record.outputs.is_empty() {
                chainstate.remove(input.tx_id.as_slice())?;
            } else {
                chainstate.insert(input.tx_id.as_slice(), record.encode().map_err(abort)?)?;
            }
        }
    }

    for tx in &block.transactions {
        let record = UtxoRecord::from_transaction(tx, block.height);
        let previous = chainstate.insert(tx.id.as_slice(), record.encode().map_err(abort)?)?;
        if previous.is_some() {
            return Err(abort(StorageError::InvariantViolation(format!(
                "transaction {} already has unspent outputs",
                hex::encode(&tx.id)
            ))));
        }
    }

    Ok(())
}
