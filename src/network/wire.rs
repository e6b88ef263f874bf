use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use crate::blockchain::{Account, Address, Block, ChainStore, Transaction};

/// Errors raised while reading a payload received from outside the node
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Malformed input: {0}")]
    Malformed(String),
}

/// Full chain snapshot exchanged between peers
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainExport {
    /// Pending transactions keyed by id
    pub unconfirmed_transactions: BTreeMap<String, Transaction>,

    /// Blocks keyed by index
    pub blocks: BTreeMap<u64, Block>,

    /// Accounts keyed by address
    pub accounts: BTreeMap<String, Account>,
}

impl ChainExport {
    /// Snapshot of a chain store
    pub fn from_store(store: &ChainStore) -> Self {
        ChainExport {
            unconfirmed_transactions: store
                .unconfirmed()
                .map(|tx| (tx.tx_id.clone(), tx.clone()))
                .collect(),
            blocks: store
                .blocks()
                .iter()
                .map(|block| (block.index, block.clone()))
                .collect(),
            accounts: store
                .accounts()
                .all()
                .into_iter()
                .map(|account| (account.address.0.clone(), account))
                .collect(),
        }
    }

    /// Converts the snapshot into a candidate chain.
    ///
    /// Block keys must run 0..N without gaps and agree with each block's own
    /// index; account keys must agree with each account's address.
    pub fn into_remote_chain(self, peer: &str) -> Result<RemoteChain, WireError> {
        if self.blocks.is_empty() {
            return Err(WireError::Malformed("chain export has no blocks".to_string()));
        }

        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (expected, (key, block)) in self.blocks.into_iter().enumerate() {
            if key != expected as u64 || block.index != key {
                return Err(WireError::Malformed(format!(
                    "block key {} does not match position {} or index {}",
                    key, expected, block.index
                )));
            }
            blocks.push(block);
        }

        let mut addresses = Vec::with_capacity(self.accounts.len());
        for (key, account) in self.accounts {
            if account.address.0 != key {
                return Err(WireError::Malformed(format!(
                    "account key {} does not match address {}",
                    key, account.address
                )));
            }
            addresses.push(account.address);
        }

        Ok(RemoteChain {
            peer: peer.to_string(),
            blocks,
            addresses,
        })
    }
}

/// A peer's chain, ready for the longest-chain rule
#[derive(Debug, Clone)]
pub struct RemoteChain {
    /// The peer that served the chain
    pub peer: String,

    pub blocks: Vec<Block>,

    /// Registered addresses, including ones that never transacted
    pub addresses: Vec<Address>,
}

impl RemoteChain {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Hash of the last block, empty for an empty chain
    pub fn tip_hash(&self) -> &str {
        self.blocks.last().map(|block| block.hash.as_str()).unwrap_or("")
    }
}

/// Known peer addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PeerList {
    pub full_nodes: Vec<String>,
}

/// Body of a peer registration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HostRequest {
    pub host: String,
}

/// Body of a remote account registration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddressRequest {
    pub address: Address,
}

/// Decodes a JSON payload, reporting any mismatch as malformed input
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, WireError> {
    serde_json::from_value(value).map_err(|e| WireError::Malformed(e.to_string()))
}
