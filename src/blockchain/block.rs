use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{hash_canonical, unix_timestamp, Address};
use super::transaction::Transaction;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Fixed genesis time so every node derives the same block 0
pub const GENESIS_TIMESTAMP: f64 = 1_546_300_800.0;

/// Errors raised when a block's identity does not match its content
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Tampered block {index}: claimed hash {claimed}, recomputed {computed}")]
    HashMismatch {
        index: u64,
        claimed: String,
        computed: String,
    },
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Ordered transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Work-gate witness
    pub proof: u64,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Timestamp when the block was created
    pub timestamp: f64,

    /// Hash of the current block (calculated)
    pub hash: String,
}

impl Block {
    /// Creates a new block stamped with the current time
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `transactions` - The list of transactions to include in the block
    /// * `proof` - The work-gate witness
    /// * `previous_hash` - The hash of the previous block
    ///
    /// # Returns
    ///
    /// A new Block instance
    pub fn new(index: u64, transactions: Vec<Transaction>, proof: u64, previous_hash: String) -> Self {
        Self::with_timestamp(index, transactions, proof, previous_hash, unix_timestamp())
    }

    /// Creates a block with an explicit timestamp
    pub fn with_timestamp(
        index: u64,
        transactions: Vec<Transaction>,
        proof: u64,
        previous_hash: String,
        timestamp: f64,
    ) -> Self {
        let mut block = Block {
            index,
            transactions,
            proof,
            previous_hash,
            timestamp,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The block every chain starts from
    pub fn genesis() -> Self {
        let transactions = vec![
            Transaction::from_network(Address::network(), "Genesis Transaction 1", 0, Some(GENESIS_TIMESTAMP)),
            Transaction::from_network(Address::network(), "Genesis Transaction 2", 0, Some(GENESIS_TIMESTAMP)),
        ];

        Self::with_timestamp(0, transactions, 0, GENESIS_PREVIOUS_HASH.to_string(), GENESIS_TIMESTAMP)
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// The SHA-256 of the canonical encoding of every field except `hash`
    pub fn calculate_hash(&self) -> String {
        let transactions: Vec<Value> = self.transactions.iter().map(Transaction::encode).collect();

        hash_canonical(&json!({
            "index": self.index,
            "transactions": transactions,
            "timestamp": self.timestamp,
            "proof": self.proof,
            "previous_hash": self.previous_hash,
        }))
    }

    /// Checks the claimed hash against the content
    pub fn verify_hash(&self) -> Result<(), BlockError> {
        let computed = self.calculate_hash();
        if computed != self.hash {
            return Err(BlockError::HashMismatch {
                index: self.index,
                claimed: self.hash.clone(),
                computed,
            });
        }
        Ok(())
    }
}
