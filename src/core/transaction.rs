//! Transaction handling for the ledger
//!
//! Implements a UTXO-based transaction model with per-input ECDSA signatures.
//!
//! Binary-format contract for transaction ids: the id is the SHA-256 of the
//! bincode encoding of the transaction with the `id` field emptied and every
//! input signature emptied. The id is therefore fixed before signing and does
//! not change when signatures are attached.

use crate::core::utxo::UtxoSet;
use crate::crypto::{lock_hash, public_key_from_bytes, sha256, verify_digest, KeyError, KeyPair};
use crate::storage::StorageError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Value paid by every coinbase transaction
pub const COINBASE_REWARD: u64 = 10;

/// Prior transactions referenced by a transaction's inputs, keyed by id
pub type ReferencedTxs = HashMap<Vec<u8>, Transaction>;

/// Transaction-related errors
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("Transfer amount must be greater than zero")]
    InvalidAmount,
    #[error("Output values overflow")]
    ValueOverflow,
    #[error("Referenced output {tx_id}:{index} not found")]
    MissingReference { tx_id: String, index: u32 },
    #[error("Input {0} carries an undecodable public key")]
    InvalidPublicKey(usize),
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("Crypto error: {0}")]
    Crypto(#[from] KeyError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl TransactionError {
    pub(crate) fn missing(tx_id: &[u8], index: u32) -> Self {
        TransactionError::MissingReference {
            tx_id: hex::encode(tx_id),
            index,
        }
    }
}

// =============================================================================
// Inputs and outputs
// =============================================================================

/// Transaction input (reference to a previous output)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction holding the referenced output
    pub tx_id: Vec<u8>,
    /// Index of the referenced output; `None` marks a coinbase input
    pub output_index: Option<u32>,
    /// Raw public key of the spender (coinbase: block height as coinbase data)
    pub public_key: Vec<u8>,
    /// Compact ECDSA signature (r || s)
    pub signature: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input spending `tx_id:output_index`
    pub fn new(tx_id: Vec<u8>, output_index: u32, public_key: Vec<u8>) -> Self {
        Self {
            tx_id,
            output_index: Some(output_index),
            public_key,
            signature: Vec::new(),
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount of coins
    pub value: u64,
    /// Locking hash of the recipient's public key
    pub lock_hash: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, lock_hash: &[u8]) -> Self {
        Self {
            value,
            lock_hash: lock_hash.to_vec(),
        }
    }

    /// Check if this output is locked to the given hash
    pub fn is_locked_with(&self, hash: &[u8]) -> bool {
        self.lock_hash == hash
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction id (see module docs for the hashing contract)
    pub id: Vec<u8>,
    /// Transaction outputs
    pub outputs: Vec<TxOutput>,
    /// Transaction inputs
    pub inputs: Vec<TxInput>,
    /// Creation time (unix seconds)
    pub timestamp: i64,
}

impl Transaction {
    /// Create an unsigned transaction and compute its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Result<Self, TransactionError> {
        let mut tx = Self {
            id: Vec::new(),
            outputs,
            inputs,
            timestamp: Utc::now().timestamp(),
        };
        tx.id = tx.compute_id()?;
        Ok(tx)
    }

    /// Create a coinbase (reward) transaction.
    ///
    /// The block height is folded in as coinbase data so two coinbases paying
    /// the same recipient never share an id.
    pub fn coinbase(recipient: &[u8], height: u64) -> Result<Self, TransactionError> {
        let input = TxInput {
            tx_id: Vec::new(),
            output_index: None,
            public_key: height.to_be_bytes().to_vec(),
            signature: Vec::new(),
        };
        Self::new(vec![input], vec![TxOutput::new(COINBASE_REWARD, recipient)])
    }

    /// True iff the single input carries the "no output" marker
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].output_index.is_none()
    }

    /// Serialize to the binary wire/disk format
    pub fn encode(&self) -> Result<Vec<u8>, TransactionError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from the binary wire/disk format
    pub fn decode(data: &[u8]) -> Result<Self, TransactionError> {
        Ok(bincode::deserialize(data)?)
    }

    /// Hash of the transaction with its id and signatures emptied
    pub fn compute_id(&self) -> Result<Vec<u8>, TransactionError> {
        let mut copy = self.clone();
        copy.id.clear();
        for input in &mut copy.inputs {
            input.signature.clear();
        }
        Ok(sha256(&copy.encode()?))
    }

    /// Check that the stored id matches the content
    pub fn has_valid_id(&self) -> Result<bool, TransactionError> {
        Ok(self.compute_id()? == self.id)
    }

    /// Copy with every input's signature and public key cleared
    fn trimmed_copy(&self) -> Transaction {
        Transaction {
            id: Vec::new(),
            outputs: self.outputs.clone(),
            inputs: self
                .inputs
                .iter()
                .map(|input| TxInput {
                    tx_id: input.tx_id.clone(),
                    output_index: input.output_index,
                    public_key: Vec::new(),
                    signature: Vec::new(),
                })
                .collect(),
            timestamp: self.timestamp,
        }
    }

    /// Digest signed for input `index`: the trimmed copy with that input's
    /// public-key slot holding the referenced output's locking hash.
    /// The slot is emptied again before returning.
    fn signing_digest(
        trimmed: &mut Transaction,
        index: usize,
        referenced_lock: &[u8],
    ) -> Result<Vec<u8>, TransactionError> {
        trimmed.inputs[index].public_key = referenced_lock.to_vec();
        let digest = bincode::serialize(&*trimmed).map(|bytes| sha256(&bytes));
        trimmed.inputs[index].public_key.clear();
        Ok(digest?)
    }

    /// Resolve the output an input spends
    fn referenced_output<'a>(
        input: &TxInput,
        referenced: &'a ReferencedTxs,
    ) -> Result<&'a TxOutput, TransactionError> {
        let index = input
            .output_index
            .ok_or_else(|| TransactionError::missing(&input.tx_id, u32::MAX))?;
        referenced
            .get(&input.tx_id)
            .and_then(|prev| prev.outputs.get(index as usize))
            .ok_or_else(|| TransactionError::missing(&input.tx_id, index))
    }

    /// Sign every input with `key`. No-op for coinbase transactions.
    pub fn sign(
        &mut self,
        key: &KeyPair,
        referenced: &ReferencedTxs,
    ) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut trimmed = self.trimmed_copy();
        for index in 0..self.inputs.len() {
            let lock = Self::referenced_output(&self.inputs[index], referenced)?
                .lock_hash
                .clone();
            let digest = Self::signing_digest(&mut trimmed, index, &lock)?;
            self.inputs[index].signature = key.sign(&digest)?;
        }

        Ok(())
    }

    /// Verify every input signature against the outputs it spends.
    ///
    /// Returns `Ok(false)` for any bad signature or key/owner mismatch; errors
    /// are reserved for structural problems (unresolvable reference,
    /// undecodable public key).
    pub fn verify(&self, referenced: &ReferencedTxs) -> Result<bool, TransactionError> {
        if self.is_coinbase() {
            return Ok(true);
        }
        if self.inputs.is_empty() {
            return Ok(false);
        }

        let mut trimmed = self.trimmed_copy();
        for (index, input) in self.inputs.iter().enumerate() {
            let output = Self::referenced_output(input, referenced)?;

            if lock_hash(&input.public_key) != output.lock_hash {
                return Ok(false);
            }

            let public_key = public_key_from_bytes(&input.public_key)
                .map_err(|_| TransactionError::InvalidPublicKey(index))?;
            let digest = Self::signing_digest(&mut trimmed, index, &output.lock_hash)?;

            if !verify_digest(&public_key, &digest, &input.signature)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Get total output amount
    pub fn total_output(&self) -> Result<u64, TransactionError> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, o| total.checked_add(o.value))
            .ok_or(TransactionError::ValueOverflow)
    }
}

// =============================================================================
// Transfer builder
// =============================================================================

/// Build and sign a transfer of `amount` from `from` to the `to` locking hash.
///
/// Inputs are chosen by [`UtxoSet::find_spendable`]; any remainder is returned
/// to the sender as a change output.
pub fn build_transfer(
    utxo: &UtxoSet,
    from: &KeyPair,
    to: &[u8],
    amount: u64,
) -> Result<Transaction, TransactionError> {
    if amount == 0 {
        return Err(TransactionError::InvalidAmount);
    }

    let sender = from.lock_hash();
    let spendable = utxo.find_spendable(&sender, amount)?;

    let public_key = from.public_key_bytes();
    let inputs = spendable
        .selection
        .iter()
        .map(|outpoint| TxInput::new(outpoint.tx_id.clone(), outpoint.index, public_key.clone()))
        .collect();

    let mut outputs = vec![TxOutput::new(amount, to)];
    let change = spendable.accumulated - amount;
    if change > 0 {
        outputs.push(TxOutput::new(change, &sender));
    }

    let mut tx = Transaction::new(inputs, outputs)?;
    let referenced = utxo.find_referenced_outputs(&tx)?;
    tx.sign(from, &referenced)?;

    log::debug!(
        "Built transaction {} spending {} input(s), change {}",
        hex::encode(&tx.id),
        tx.inputs.len(),
        change
    );
    Ok(tx)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// A funding transaction paying `value` to `key`, plus a signed spend of it.
    fn funded_spend(key: &KeyPair, value: u64) -> (Transaction, ReferencedTxs) {
        let funding = Transaction::coinbase(&key.lock_hash(), 0).unwrap();
        let mut referenced = ReferencedTxs::new();
        referenced.insert(funding.id.clone(), funding.clone());

        let recipient = KeyPair::generate();
        let mut tx = Transaction::new(
            vec![TxInput::new(funding.id.clone(), 0, key.public_key_bytes())],
            vec![
                TxOutput::new(value - 3, &recipient.lock_hash()),
                TxOutput::new(3, &key.lock_hash()),
            ],
        )
        .unwrap();
        tx.sign(key, &referenced).unwrap();
        (tx, referenced)
    }

    #[test]
    fn test_coinbase_transaction() {
        let key = KeyPair::generate();
        let tx = Transaction::coinbase(&key.lock_hash(), 7).unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.total_output().unwrap(), COINBASE_REWARD);
        assert!(tx.verify(&ReferencedTxs::new()).unwrap());
        assert!(tx.has_valid_id().unwrap());
    }

    #[test]
    fn test_total_output_overflow() {
        let key = KeyPair::generate();
        let tx = Transaction::new(
            Vec::new(),
            vec![
                TxOutput::new(u64::MAX, &key.lock_hash()),
                TxOutput::new(11, &key.lock_hash()),
            ],
        )
        .unwrap();
        assert!(matches!(
            tx.total_output(),
            Err(TransactionError::ValueOverflow)
        ));
    }

    #[test]
    fn test_coinbase_ids_differ_by_height() {
        let key = KeyPair::generate();
        let a = Transaction::coinbase(&key.lock_hash(), 1).unwrap();
        let b = Transaction::coinbase(&key.lock_hash(), 2).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_sign_and_verify() {
        let key = KeyPair::generate();
        let (tx, referenced) = funded_spend(&key, COINBASE_REWARD);
        assert!(!tx.is_coinbase());
        assert!(tx.verify(&referenced).unwrap());
    }

    #[test]
    fn test_signing_does_not_change_id() {
        let key = KeyPair::generate();
        let (tx, _) = funded_spend(&key, COINBASE_REWARD);
        assert!(tx.has_valid_id().unwrap());
        assert!(tx.inputs.iter().all(|i| !i.signature.is_empty()));
    }

    #[test]
    fn test_tampered_output_fails_verification() {
        let key = KeyPair::generate();
        let (mut tx, referenced) = funded_spend(&key, COINBASE_REWARD);
        tx.outputs[0].value += 1;
        assert!(!tx.verify(&referenced).unwrap());

        let (mut tx, referenced) = funded_spend(&key, COINBASE_REWARD);
        tx.outputs[1].lock_hash[0] ^= 0x01;
        assert!(!tx.verify(&referenced).unwrap());
    }

    #[test]
    fn test_foreign_key_cannot_spend() {
        let owner = KeyPair::generate();
        let thief = KeyPair::generate();
        let funding = Transaction::coinbase(&owner.lock_hash(), 0).unwrap();
        let mut referenced = ReferencedTxs::new();
        referenced.insert(funding.id.clone(), funding.clone());

        let mut tx = Transaction::new(
            vec![TxInput::new(funding.id.clone(), 0, thief.public_key_bytes())],
            vec![TxOutput::new(COINBASE_REWARD, &thief.lock_hash())],
        )
        .unwrap();
        tx.sign(&thief, &referenced).unwrap();
        assert!(!tx.verify(&referenced).unwrap());
    }

    #[test]
    fn test_missing_reference_is_error() {
        let key = KeyPair::generate();
        let (tx, _) = funded_spend(&key, COINBASE_REWARD);
        assert!(matches!(
            tx.verify(&ReferencedTxs::new()),
            Err(TransactionError::MissingReference { .. })
        ));
    }

    #[test]
    fn test_multi_input_signatures_are_independent() {
        let key = KeyPair::generate();
        let a = Transaction::coinbase(&key.lock_hash(), 1).unwrap();
        let b = Transaction::coinbase(&key.lock_hash(), 2).unwrap();
        let mut referenced = ReferencedTxs::new();
        referenced.insert(a.id.clone(), a.clone());
        referenced.insert(b.id.clone(), b.clone());

        let mut tx = Transaction::new(
            vec![
                TxInput::new(a.id.clone(), 0, key.public_key_bytes()),
                TxInput::new(b.id.clone(), 0, key.public_key_bytes()),
            ],
            vec![TxOutput::new(20, &KeyPair::generate().lock_hash())],
        )
        .unwrap();
        tx.sign(&key, &referenced).unwrap();
        assert!(tx.verify(&referenced).unwrap());

        // Swapping signatures between inputs must not verify
        let first = std::mem::take(&mut tx.inputs[0].signature);
        tx.inputs[0].signature = std::mem::replace(&mut tx.inputs[1].signature, first);
        assert!(!tx.verify(&referenced).unwrap());
    }

    #[test]
    fn test_encode_decode() {
        let key = KeyPair::generate();
        let (tx, _) = funded_spend(&key, COINBASE_REWARD);
        let decoded = Transaction::decode(&tx.encode().unwrap()).unwrap();
        assert_eq!(decoded, tx);
    }
}
