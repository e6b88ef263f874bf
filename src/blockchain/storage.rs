use std::path::Path;

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use thiserror::Error;

use super::account::Account;
use super::block::Block;
use super::chain::ChainStore;
use super::crypto::Address;
use super::transaction::Transaction;

const NODE_ID_KEY: &str = "node_id";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Everything needed to rebuild a [`ChainStore`]
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub blocks: Vec<Block>,
    pub addresses: Vec<Address>,
    pub unconfirmed: Vec<Transaction>,
}

/// Persistent storage for chain snapshots
pub struct ChainStorage {
    /// The database instance
    db: Db,

    /// Blocks keyed by big-endian index
    blocks: Tree,

    /// Accounts keyed by address
    accounts: Tree,

    /// Pending transactions keyed by big-endian queue position
    unconfirmed: Tree,

    /// Node metadata
    metadata: Tree,
}

impl std::fmt::Debug for ChainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStorage").finish()
    }
}

impl ChainStorage {
    /// Opens (or creates) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// Opens a database that is removed when dropped
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        let accounts = db.open_tree("accounts")?;
        let unconfirmed = db.open_tree("unconfirmed")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            accounts,
            unconfirmed,
            metadata,
        })
    }

    /// Writes one block
    fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        self.blocks.insert(block.index.to_be_bytes(), encode(block)?)?;
        Ok(())
    }

    /// Writes the given accounts, leaving the others untouched
    fn save_accounts<'a, I>(&self, accounts: I) -> Result<(), StorageError>
    where
        I: IntoIterator<Item = &'a Account>,
    {
        for account in accounts {
            self.accounts.insert(account.address.as_str().as_bytes(), encode(account)?)?;
        }
        Ok(())
    }

    /// Replaces the saved unconfirmed pool
    fn save_unconfirmed<'a, I>(&self, pool: I) -> Result<(), StorageError>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        self.unconfirmed.clear()?;
        for (position, transaction) in pool.into_iter().enumerate() {
            self.unconfirmed.insert((position as u64).to_be_bytes(), encode(transaction)?)?;
        }
        Ok(())
    }

    /// Flushes pending writes to disk
    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Writes what one mutation changed and flushes it to disk
    ///
    /// # Arguments
    ///
    /// * `store` - The store after the mutation
    /// * `block` - The block appended by the mutation, if any
    /// * `touched` - Addresses whose accounts may have changed
    pub fn save_changes(
        &self,
        store: &ChainStore,
        block: Option<&Block>,
        touched: &[Address],
    ) -> Result<(), StorageError> {
        if let Some(block) = block {
            self.save_block(block)?;
        }
        self.save_accounts(touched.iter().filter_map(|address| store.account(address)))?;
        self.save_unconfirmed(store.unconfirmed())?;
        self.flush()
    }

    /// Writes the whole chain store and flushes it to disk
    pub fn save(&self, store: &ChainStore) -> Result<(), StorageError> {
        for block in store.blocks() {
            self.save_block(block)?;
        }

        // A replaced chain is always longer, but stale keys are cleared anyway
        let length = store.len() as u64;
        for key in self.blocks.range(length.to_be_bytes()..).keys() {
            self.blocks.remove(key?)?;
        }

        self.accounts.clear()?;
        self.save_accounts(&store.accounts().all())?;

        self.save_unconfirmed(store.unconfirmed())?;
        self.flush()
    }

    /// Reads the saved snapshot
    ///
    /// # Returns
    ///
    /// `None` when nothing has been saved yet
    pub fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        let blocks: Vec<Block> = decode_tree(&self.blocks)?;
        if blocks.is_empty() {
            return Ok(None);
        }

        let accounts: Vec<Account> = decode_tree(&self.accounts)?;
        let unconfirmed: Vec<Transaction> = decode_tree(&self.unconfirmed)?;

        info!(
            "Loaded {} blocks, {} accounts and {} pending transactions from storage",
            blocks.len(),
            accounts.len(),
            unconfirmed.len()
        );

        Ok(Some(Snapshot {
            blocks,
            addresses: accounts.into_iter().map(|account| account.address).collect(),
            unconfirmed,
        }))
    }

    /// Gets the saved node identifier
    pub fn node_id(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .metadata
            .get(NODE_ID_KEY)?
            .map(|value| String::from_utf8_lossy(&value).to_string()))
    }

    /// Saves the node identifier
    pub fn save_node_id(&self, node_id: &str) -> Result<(), StorageError> {
        self.metadata.insert(NODE_ID_KEY, node_id.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Decodes every value of a tree in key order
fn decode_tree<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, StorageError> {
    let mut items = Vec::new();

    for result in tree.iter() {
        let (key, value) = result?;
        let item = serde_json::from_slice(&value).map_err(|e| {
            let key_str = String::from_utf8_lossy(key.as_ref()).to_string();
            warn!("Failed to deserialize entry {:?}: {}", key_str, e);
            StorageError::DeserializationError(e.to_string())
        })?;
        items.push(item);
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::pow;

    fn populated_store() -> ChainStore {
        let mut store = ChainStore::new();
        store.register_account(Address::from("A1")).unwrap();
        store.register_account(Address::from("B2")).unwrap();
        let proof = pow::solve(store.last_block().proof).unwrap();
        store.mine_block(&Address::from("A1"), proof).unwrap();
        store
            .edit_account(&Address::from("B2"), Some("bee".to_string()), None)
            .unwrap();
        store
    }

    #[test]
    fn test_empty_storage() {
        let storage = ChainStorage::temporary().unwrap();
        assert!(storage.load().unwrap().is_none());
        assert!(storage.node_id().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let storage = ChainStorage::temporary().unwrap();
        let store = populated_store();

        storage.save(&store).unwrap();
        let snapshot = storage.load().unwrap().unwrap();

        assert_eq!(snapshot.blocks, store.blocks());
        assert_eq!(snapshot.addresses, vec![Address::from("A1"), Address::from("B2")]);
        assert_eq!(snapshot.unconfirmed.len(), 1);

        let restored = ChainStore::from_snapshot(snapshot.blocks, &snapshot.addresses, snapshot.unconfirmed).unwrap();
        assert_eq!(restored.accounts().all(), store.accounts().all());
    }

    #[test]
    fn test_save_overwrites_previous_snapshot() {
        let storage = ChainStorage::temporary().unwrap();
        let mut store = populated_store();
        storage.save(&store).unwrap();

        let proof = pow::solve(store.last_block().proof).unwrap();
        store.mine_block(&Address::from("B2"), proof).unwrap();
        storage.save(&store).unwrap();

        let snapshot = storage.load().unwrap().unwrap();
        assert_eq!(snapshot.blocks.len(), 3);
        assert!(snapshot.unconfirmed.is_empty());
    }

    #[test]
    fn test_incremental_writes_match_full_save() {
        let mut store = populated_store();
        let full = ChainStorage::temporary().unwrap();
        let incremental = ChainStorage::temporary().unwrap();
        full.save(&store).unwrap();
        incremental.save(&store).unwrap();

        let proof = pow::solve(store.last_block().proof).unwrap();
        let block = store.mine_block(&Address::from("A1"), proof).unwrap();
        full.save(&store).unwrap();

        let touched = [Address::from("A1"), Address::from("B2")];
        incremental.save_changes(&store, Some(&block), &touched).unwrap();

        let expected = full.load().unwrap().unwrap();
        let actual = incremental.load().unwrap().unwrap();
        assert_eq!(actual.blocks, expected.blocks);
        assert_eq!(actual.addresses, expected.addresses);
        assert!(actual.unconfirmed.is_empty());
        assert_eq!(decode_tree::<Account>(&incremental.accounts).unwrap(), store.accounts().all());
    }

    #[test]
    fn test_save_changes_leaves_other_accounts() {
        let mut store = populated_store();
        let storage = ChainStorage::temporary().unwrap();
        storage.save(&store).unwrap();

        store.register_account(Address::from("C3")).unwrap();
        storage.save_changes(&store, None, &[Address::from("C3")]).unwrap();

        let snapshot = storage.load().unwrap().unwrap();
        assert_eq!(snapshot.blocks.len(), 2);
        assert_eq!(
            snapshot.addresses,
            vec![Address::from("A1"), Address::from("B2"), Address::from("C3")]
        );
        assert_eq!(snapshot.unconfirmed.len(), 1);
    }

    #[test]
    fn test_node_id() {
        let storage = ChainStorage::temporary().unwrap();
        storage.save_node_id("abc123").unwrap();
        assert_eq!(storage.node_id().unwrap().as_deref(), Some("abc123"));
    }
}
