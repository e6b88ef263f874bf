// Blockchain module
//
// This module contains the core ledger implementation including:
// - Canonical hashing
// - Transaction structure
// - Account ledger
// - Block structure
// - Proof of work gate
// - Chain store and its persistence

pub mod account;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod pow;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use account::{Account, AccountError};
pub use block::Block;
pub use chain::{ChainError, ChainStore};
pub use crypto::Address;
pub use storage::{ChainStorage, StorageError};
pub use transaction::Transaction;
