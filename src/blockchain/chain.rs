use std::collections::{HashSet, VecDeque};

use log::{info, warn};
use thiserror::Error;

use super::account::{Account, AccountError, AccountState};
use super::block::{Block, BlockError};
use super::crypto::Address;
use super::pow;
use super::transaction::{Transaction, TransactionError};

/// Fee charged for every profile edit, paid to the treasury
pub const EDIT_FEE: u64 = 20;

/// Treasury credit for mining a block
pub const MINING_REWARD: u64 = 200;

/// Errors that can occur during chain store operations
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("{0}")]
    TamperedBlock(#[from] BlockError),

    #[error("Out-of-order block: expected index {expected}, got {got}")]
    OutOfOrderBlock { expected: u64, got: u64 },

    #[error("Fork/orphan block {index}: previous hash {claimed} does not match tip {expected}")]
    OrphanBlock {
        index: u64,
        claimed: String,
        expected: String,
    },

    #[error("Invalid proof {proof} for block {index} (last proof {last_proof})")]
    InvalidProof { index: u64, last_proof: u64, proof: u64 },

    #[error("{0}")]
    CorruptTransaction(#[from] TransactionError),

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Account error: {0}")]
    AccountError(#[from] AccountError),

    #[error("Block {index} issues {minted}, above the limit of {limit}")]
    ExcessIssuance { index: u64, minted: u64, limit: u64 },

    #[error("Genesis block does not match the network genesis")]
    InvalidGenesis,

    #[error("Candidate chain of length {candidate} is not longer than local chain of length {local}")]
    NotLonger { local: usize, candidate: usize },
}

/// The node's authoritative ledger: blocks, accounts and unconfirmed pool.
///
/// Two ledgers are kept. `ledger` holds the effects of `blocks` only and is
/// what incoming blocks are checked against; `accounts` is `ledger` with the
/// unconfirmed pool applied on top and is what callers see.
#[derive(Debug, Clone)]
pub struct ChainStore {
    /// The chain of blocks, never empty
    blocks: Vec<Block>,

    /// Account state of the confirmed chain
    ledger: AccountState,

    /// Confirmed state plus the unconfirmed pool
    accounts: AccountState,

    /// Transactions waiting to be included in a block
    unconfirmed: VecDeque<Transaction>,

    /// Ids of pending transactions
    staged: HashSet<String>,

    /// Ids of transactions included in `blocks`
    confirmed: HashSet<String>,
}

impl Default for ChainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStore {
    /// Creates a chain store holding only the genesis block
    pub fn new() -> Self {
        let genesis = Block::genesis();
        let confirmed = genesis.transactions.iter().map(|tx| tx.tx_id.clone()).collect();

        ChainStore {
            blocks: vec![genesis],
            ledger: AccountState::new(),
            accounts: AccountState::new(),
            unconfirmed: VecDeque::new(),
            staged: HashSet::new(),
            confirmed,
        }
    }

    /// Rebuilds a chain store from a saved snapshot
    ///
    /// # Arguments
    ///
    /// * `blocks` - The saved chain, starting at genesis
    /// * `addresses` - Registered addresses; re-opened before replay
    /// * `unconfirmed` - Saved pool, re-applied after replay
    ///
    /// # Returns
    ///
    /// The rebuilt store, or the first validation failure. Pool entries that
    /// no longer apply are dropped.
    pub fn from_snapshot(
        blocks: Vec<Block>,
        addresses: &[Address],
        unconfirmed: Vec<Transaction>,
    ) -> Result<Self, ChainError> {
        let mut store = if blocks.is_empty() {
            let mut store = Self::new();
            store.register_all(addresses);
            store
        } else {
            Self::replay(blocks, addresses)?
        };

        for transaction in unconfirmed {
            let tx_id = transaction.tx_id.clone();
            if let Err(err) = store.enqueue_unconfirmed(transaction) {
                warn!("Dropping saved transaction {}: {}", tx_id, err);
            }
        }

        Ok(store)
    }

    /// Validates `blocks` from genesis and replays them onto a fresh ledger
    fn replay(blocks: Vec<Block>, addresses: &[Address]) -> Result<Self, ChainError> {
        let mut blocks = blocks.into_iter();
        let mut store = Self::new();

        match blocks.next() {
            Some(genesis) => {
                genesis.verify_hash()?;
                if genesis != *store.last_block() {
                    return Err(ChainError::InvalidGenesis);
                }
            }
            None => return Err(ChainError::InvalidGenesis),
        }

        store.register_all(addresses);
        for block in blocks {
            store.append(block)?;
        }

        Ok(store)
    }

    fn register_all(&mut self, addresses: &[Address]) {
        for address in addresses {
            if let Err(err) = self.register_account(address.clone()) {
                warn!("Skipping snapshot address {}: {}", address, err);
            }
        }
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    /// Checks that `block` may extend the current tip.
    ///
    /// Checks run in order: claimed hash, index, linkage, proof, every
    /// transaction id, then treasury issuance, which may not exceed one
    /// [`MINING_REWARD`]. Ledger effects are checked by [`ChainStore::append`].
    pub fn validate_successor(&self, block: &Block) -> Result<(), ChainError> {
        let last = self.last_block();

        block.verify_hash()?;

        if block.index != last.index + 1 {
            return Err(ChainError::OutOfOrderBlock {
                expected: last.index + 1,
                got: block.index,
            });
        }

        if block.previous_hash != last.hash {
            return Err(ChainError::OrphanBlock {
                index: block.index,
                claimed: block.previous_hash.clone(),
                expected: last.hash.clone(),
            });
        }

        if !pow::verify(last.proof, block.proof) {
            return Err(ChainError::InvalidProof {
                index: block.index,
                last_proof: last.proof,
                proof: block.proof,
            });
        }

        let mut seen = HashSet::new();
        for transaction in &block.transactions {
            transaction.verify_id()?;
            if self.confirmed.contains(&transaction.tx_id) || !seen.insert(transaction.tx_id.as_str()) {
                return Err(ChainError::DuplicateTransaction(transaction.tx_id.clone()));
            }
        }

        let minted = block
            .transactions
            .iter()
            .filter(|transaction| transaction.is_network_issued() && !transaction.destination.is_network())
            .try_fold(0u64, |sum, transaction| sum.checked_add(transaction.amount));
        match minted {
            Some(minted) if minted <= MINING_REWARD => Ok(()),
            minted => Err(ChainError::ExcessIssuance {
                index: block.index,
                minted: minted.unwrap_or(u64::MAX),
                limit: MINING_REWARD,
            }),
        }
    }

    /// Validates then appends a block, applying its transactions to the
    /// confirmed ledger.
    ///
    /// The pool is then re-applied on top: entries the block included leave
    /// the pool, entries that no longer apply are dropped. On any failure the
    /// store is unchanged.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        self.validate_successor(&block)?;

        let mut ledger = self.ledger.clone();
        for transaction in &block.transactions {
            ledger.apply(transaction)?;
        }

        self.ledger = ledger;
        for transaction in &block.transactions {
            self.confirmed.insert(transaction.tx_id.clone());
        }

        info!(
            "Appended block {} with {} transactions ({})",
            block.index,
            block.transactions.len(),
            block.hash
        );
        self.blocks.push(block);
        self.restage_pool();

        Ok(())
    }

    /// Rebuilds `accounts` from the confirmed ledger plus the pool
    fn restage_pool(&mut self) {
        let pending = std::mem::take(&mut self.unconfirmed);
        self.staged.clear();
        self.accounts = self.ledger.clone();

        for transaction in pending {
            if self.confirmed.contains(&transaction.tx_id) {
                continue;
            }
            let tx_id = transaction.tx_id.clone();
            if let Err(err) = self.enqueue_unconfirmed(transaction) {
                warn!("Dropping pending transaction {}: {}", tx_id, err);
            }
        }
    }

    /// Adopts `candidate` if it is strictly longer and valid from genesis.
    ///
    /// Blocks, accounts and the unconfirmed pool are rebuilt by replaying the
    /// candidate; `addresses` are registered before replay so accounts that
    /// never transacted survive. On failure the store is unchanged.
    pub fn replace_with(&mut self, candidate: Vec<Block>, addresses: &[Address]) -> Result<(), ChainError> {
        if candidate.len() <= self.blocks.len() {
            return Err(ChainError::NotLonger {
                local: self.blocks.len(),
                candidate: candidate.len(),
            });
        }

        let replaced = Self::replay(candidate, addresses)?;
        info!(
            "Replaced chain of length {} with chain of length {}",
            self.blocks.len(),
            replaced.blocks.len()
        );
        *self = replaced;

        Ok(())
    }

    /// Applies a transaction to the ledger and queues it for the next block
    pub fn enqueue_unconfirmed(&mut self, transaction: Transaction) -> Result<(), ChainError> {
        transaction.verify_id()?;

        if self.staged.contains(&transaction.tx_id) || self.confirmed.contains(&transaction.tx_id) {
            return Err(ChainError::DuplicateTransaction(transaction.tx_id));
        }

        self.accounts.apply(&transaction)?;
        self.staged.insert(transaction.tx_id.clone());
        self.unconfirmed.push_back(transaction);

        Ok(())
    }

    /// Takes the oldest pending transaction for block assembly.
    ///
    /// Its effects stay in the visible accounts until the block carrying it
    /// is appended.
    pub fn dequeue_unconfirmed(&mut self) -> Option<Transaction> {
        let transaction = self.unconfirmed.pop_front()?;
        self.staged.remove(&transaction.tx_id);
        Some(transaction)
    }

    /// Registers a new account
    pub fn register_account(&mut self, address: Address) -> Result<Account, ChainError> {
        // The visible ledger is a superset of the confirmed one, so it fails first
        let account = self.accounts.register(address.clone())?.clone();
        self.ledger.register(address)?;
        info!("Registered account {}", account.address);
        Ok(account)
    }

    /// Charges the edit fee and records the edit as a pending transaction
    ///
    /// # Returns
    ///
    /// The fee transaction; the account is unchanged on failure
    pub fn edit_account(
        &mut self,
        address: &Address,
        name: Option<String>,
        data: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Transaction, ChainError> {
        if !self.accounts.contains(address) {
            return Err(AccountError::AccountNotFound(address.clone()).into());
        }

        let transaction = Transaction::profile_edit(address.clone(), name, data, EDIT_FEE);
        self.enqueue_unconfirmed(transaction.clone())?;

        Ok(transaction)
    }

    /// Assembles and appends the next block from the pool plus a reward
    ///
    /// # Arguments
    ///
    /// * `miner` - The address credited with the reward
    /// * `proof` - A proof solved against the current tip
    pub fn mine_block(&mut self, miner: &Address, proof: u64) -> Result<Block, ChainError> {
        let last = self.last_block();
        if !pow::verify(last.proof, proof) {
            return Err(ChainError::InvalidProof {
                index: last.index + 1,
                last_proof: last.proof,
                proof,
            });
        }
        let (index, previous_hash) = (last.index + 1, last.hash.clone());

        let mut transactions = Vec::with_capacity(self.unconfirmed.len() + 1);
        while let Some(transaction) = self.dequeue_unconfirmed() {
            transactions.push(transaction);
        }
        let pending = transactions.len();
        transactions.push(Transaction::from_network(miner.clone(), "Block reward", MINING_REWARD, None));

        let block = Block::new(index, transactions, proof, previous_hash);
        if let Err(err) = self.append(block.clone()) {
            for transaction in block.transactions.into_iter().take(pending).rev() {
                self.staged.insert(transaction.tx_id.clone());
                self.unconfirmed.push_front(transaction);
            }
            return Err(err);
        }

        Ok(block)
    }

    /// Gets an account by address
    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn accounts(&self) -> &AccountState {
        &self.accounts
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Pending transactions in queue order
    pub fn unconfirmed(&self) -> impl Iterator<Item = &Transaction> {
        self.unconfirmed.iter()
    }

    /// Number of blocks, including genesis
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Checks hash linkage and proofs across the whole chain
    #[cfg(test)]
    pub fn is_valid(&self) -> bool {
        self.blocks.windows(2).all(|pair| {
            let (previous, current) = (&pair[0], &pair[1]);
            current.verify_hash().is_ok()
                && current.index == previous.index + 1
                && current.previous_hash == previous.hash
                && pow::verify(previous.proof, current.proof)
        })
    }
}
