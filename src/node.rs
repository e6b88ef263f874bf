use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{error, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::blockchain::{pow, Account, Address, Block, ChainError, ChainStorage, ChainStore, Transaction};
use crate::error::NodeError;
use crate::network::{ChainExport, PeerClient, PeerList, PeerSet};

/// Result of a profile edit
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EditReceipt {
    /// The profile after the edit
    pub account: Account,

    /// The fee transaction queued for the next block
    pub transaction: Transaction,
}

/// Result of a synchronization round
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SyncReport {
    /// Peer whose chain was adopted, if any
    pub adopted_from: Option<String>,

    /// Local chain length after the round
    pub length: usize,

    /// Known peers after the round
    pub peers: Vec<String>,
}

/// A ledger node: the chain store behind one lock, the peer set, and the
/// operations exposed to the transport layer
pub struct Node {
    node_id: Address,
    chain: RwLock<ChainStore>,
    peers: PeerSet,
    client: Arc<dyn PeerClient>,
    storage: Option<ChainStorage>,

    /// Cancelled whenever the tip moves under a running proof search
    mining_token: Mutex<CancellationToken>,

    /// One mining round at a time
    mining: tokio::sync::Mutex<()>,
}

impl Node {
    /// Creates a node holding only the genesis block
    ///
    /// # Arguments
    ///
    /// * `node_id` - The node's identifier, also its account address
    /// * `public_address` - The address peers reach this node at
    /// * `peers` - Initial peer addresses
    /// * `client` - Transport used to reach peers
    pub fn new(node_id: Address, public_address: String, peers: Vec<String>, client: Arc<dyn PeerClient>) -> Self {
        Self::from_parts(node_id, public_address, peers, client, ChainStore::new(), None)
    }

    /// Creates a node backed by persistent storage, resuming any saved chain
    pub fn with_storage(
        node_id: Address,
        public_address: String,
        peers: Vec<String>,
        client: Arc<dyn PeerClient>,
        storage: ChainStorage,
    ) -> Result<Self, NodeError> {
        let store = match storage.load()? {
            Some(snapshot) => ChainStore::from_snapshot(snapshot.blocks, &snapshot.addresses, snapshot.unconfirmed)?,
            None => {
                info!("No saved chain found, starting from genesis");
                let store = ChainStore::new();
                storage.save(&store)?;
                store
            }
        };

        Ok(Self::from_parts(node_id, public_address, peers, client, store, Some(storage)))
    }

    fn from_parts(
        node_id: Address,
        public_address: String,
        peers: Vec<String>,
        client: Arc<dyn PeerClient>,
        store: ChainStore,
        storage: Option<ChainStorage>,
    ) -> Self {
        Node {
            node_id,
            chain: RwLock::new(store),
            peers: PeerSet::new(public_address, peers),
            client,
            storage,
            mining_token: Mutex::new(CancellationToken::new()),
            mining: tokio::sync::Mutex::new(()),
        }
    }

    fn read_chain(&self) -> Result<RwLockReadGuard<'_, ChainStore>, NodeError> {
        self.chain
            .read()
            .map_err(|_| NodeError::Internal("chain lock poisoned".to_string()))
    }

    fn write_chain(&self) -> Result<RwLockWriteGuard<'_, ChainStore>, NodeError> {
        self.chain
            .write()
            .map_err(|_| NodeError::Internal("chain lock poisoned".to_string()))
    }

    /// Saves the whole store if the node has storage; failures are logged only
    fn persist_all(&self, store: &ChainStore) {
        if let Some(storage) = &self.storage {
            if let Err(err) = storage.save(store) {
                error!("Failed to persist chain: {}", err);
            }
        }
    }

    /// Saves what one mutation changed; failures are logged only
    fn persist_changes(&self, store: &ChainStore, block: Option<&Block>, touched: &[Address]) {
        if let Some(storage) = &self.storage {
            if let Err(err) = storage.save_changes(store, block, touched) {
                error!("Failed to persist chain changes: {}", err);
            }
        }
    }

    /// Replaces the mining token with a fresh one and returns it
    fn fresh_mining_token(&self) -> Result<CancellationToken, NodeError> {
        let mut token = self
            .mining_token
            .lock()
            .map_err(|_| NodeError::Internal("mining token lock poisoned".to_string()))?;
        *token = CancellationToken::new();
        Ok(token.clone())
    }

    /// Aborts the running proof search, if any
    fn cancel_mining(&self) {
        if let Ok(token) = self.mining_token.lock() {
            token.cancel();
        }
    }

    /// Creates the account for this node's own identifier and tells peers
    pub async fn create_local_account(&self) -> Result<Account, NodeError> {
        let account = {
            let mut chain = self.write_chain()?;
            let account = chain.register_account(self.node_id.clone())?;
            self.persist_changes(&chain, None, &[account.address.clone()]);
            account
        };

        self.peers.broadcast_account(self.client.as_ref(), &account.address).await;
        Ok(account)
    }

    /// Registers an account announced by a peer
    pub fn register_remote_account(&self, address: Address) -> Result<Account, NodeError> {
        if address.as_str().trim().is_empty() {
            return Err(NodeError::MalformedInput("address must not be empty".to_string()));
        }

        let mut chain = self.write_chain()?;
        let account = chain.register_account(address)?;
        self.persist_changes(&chain, None, &[account.address.clone()]);
        Ok(account)
    }

    /// Gets an account by address
    pub fn view_account(&self, address: &Address) -> Result<Account, NodeError> {
        self.read_chain()?
            .account(address)
            .cloned()
            .ok_or_else(|| crate::blockchain::AccountError::AccountNotFound(address.clone()).into())
    }

    /// Edits a profile, charging the edit fee
    ///
    /// At least one of `name` and `data` must be given.
    pub fn edit_account(
        &self,
        address: &Address,
        name: Option<String>,
        data: Option<Map<String, Value>>,
    ) -> Result<EditReceipt, NodeError> {
        if name.is_none() && data.is_none() {
            return Err(NodeError::MalformedInput("an edit needs a name or data".to_string()));
        }

        let mut chain = self.write_chain()?;
        let transaction = chain.edit_account(address, name, data)?;
        let account = chain
            .account(address)
            .cloned()
            .ok_or_else(|| NodeError::Internal(format!("account {} vanished during edit", address)))?;
        self.persist_changes(&chain, None, &[address.clone()]);

        info!("Profile {} edited, fee transaction {}", address, transaction.tx_id);
        Ok(EditReceipt { account, transaction })
    }

    /// Solves the work-gate for the current tip, then appends and broadcasts
    /// the next block.
    ///
    /// The proof search runs on a blocking worker. If a peer block moves the
    /// tip meanwhile, the search is cancelled and restarted on the new tip.
    pub async fn mine_next_block(&self) -> Result<Block, NodeError> {
        let _mining = self.mining.lock().await;

        loop {
            let (tip_hash, last_proof) = {
                let chain = self.read_chain()?;
                let last = chain.last_block();
                (last.hash.clone(), last.proof)
            };

            let token = self.fresh_mining_token()?;
            let proof = tokio::task::spawn_blocking(move || pow::solve_cancellable(last_proof, &token))
                .await
                .map_err(|e| NodeError::Internal(format!("proof worker failed: {}", e)))??;

            let Some(proof) = proof else {
                info!("Tip changed during proof search, restarting");
                continue;
            };

            let Some(block) = self.seal_block(&tip_hash, proof)? else {
                info!("Tip changed before block assembly, restarting");
                continue;
            };

            info!("Mined block {} with proof {}", block.index, proof);
            self.peers.broadcast_block(self.client.as_ref(), &block).await;
            return Ok(block);
        }
    }

    /// Assembles the next block on `tip_hash` with a solved proof
    ///
    /// # Returns
    ///
    /// `None` if the tip is no longer `tip_hash`
    fn seal_block(&self, tip_hash: &str, proof: u64) -> Result<Option<Block>, NodeError> {
        let mut chain = self.write_chain()?;
        if chain.last_block().hash != tip_hash {
            return Ok(None);
        }

        let mut touched = touched_by(&chain, None);
        let block = chain.mine_block(&self.node_id, proof)?;
        touched.push(self.node_id.clone());
        self.persist_changes(&chain, Some(&block), &touched);
        Ok(Some(block))
    }

    /// Full chain snapshot
    pub fn export_chain(&self) -> Result<ChainExport, NodeError> {
        let chain = self.read_chain()?;
        Ok(ChainExport::from_store(&chain))
    }

    pub fn list_peers(&self) -> PeerList {
        self.peers.peer_list()
    }

    /// Adds a peer
    ///
    /// # Returns
    ///
    /// true if the peer was not known before
    pub fn register_peer(&self, address: &str) -> Result<bool, NodeError> {
        if address.trim().is_empty() {
            return Err(NodeError::MalformedInput("host must not be empty".to_string()));
        }

        let added = self.peers.add(address);
        if added {
            info!("Registered peer {}", address);
        }
        Ok(added)
    }

    /// Validates and appends a block produced by a peer.
    ///
    /// A block ahead of the local tip triggers a synchronization round; the
    /// call succeeds if that round brings the block in.
    pub async fn receive_block(&self, block: Block) -> Result<(), NodeError> {
        let (index, hash) = (block.index, block.hash.clone());

        let result = {
            let mut chain = self.write_chain()?;
            let touched = touched_by(&chain, Some(&block));
            let appended = block.clone();
            let result = chain.append(block);
            if result.is_ok() {
                self.persist_changes(&chain, Some(&appended), &touched);
            }
            result
        };

        match result {
            Ok(()) => {
                self.cancel_mining();
                Ok(())
            }
            Err(ChainError::OutOfOrderBlock { expected, got }) if got > expected => {
                info!("Block {} is ahead of local tip {}, synchronizing", got, expected - 1);
                if let Err(err) = self.synchronize().await {
                    warn!("Synchronization after block {} failed: {}", got, err);
                }

                let adopted = self
                    .read_chain()?
                    .blocks()
                    .get(index as usize)
                    .map(|block| block.hash == hash)
                    .unwrap_or(false);
                if adopted {
                    Ok(())
                } else {
                    Err(ChainError::OutOfOrderBlock { expected, got }.into())
                }
            }
            Err(err) => {
                warn!("Rejected block {}: {}", index, err);
                Err(err.into())
            }
        }
    }

    /// Runs one synchronization round: discover peers, announce this node,
    /// then adopt the best longer valid chain any peer serves.
    pub async fn synchronize(&self) -> Result<SyncReport, NodeError> {
        let client = self.client.as_ref();

        self.peers.discover(client).await;
        self.peers.announce(client).await;

        let local_length = self.read_chain()?.len();
        let mut adopted_from = None;

        for candidate in self.peers.sync_chain(client, local_length).await {
            let peer = candidate.peer.clone();
            let result = {
                let mut chain = self.write_chain()?;
                let result = chain.replace_with(candidate.blocks, &candidate.addresses);
                if result.is_ok() {
                    self.persist_all(&chain);
                }
                result
            };

            match result {
                Ok(()) => {
                    self.cancel_mining();
                    info!("Adopted chain from {}", peer);
                    adopted_from = Some(peer);
                    break;
                }
                Err(err) => warn!("Chain from {} rejected: {}", peer, err),
            }
        }

        Ok(SyncReport {
            adopted_from,
            length: self.read_chain()?.len(),
            peers: self.peers.list(),
        })
    }
}

/// Addresses whose accounts a block append may change: the parties of the
/// block and of every pending transaction, since the pool is re-applied
fn touched_by(chain: &ChainStore, block: Option<&Block>) -> Vec<Address> {
    let block_parties = block.into_iter().flat_map(|block| block.transactions.iter());
    let mut touched: Vec<Address> = chain
        .unconfirmed()
        .chain(block_parties)
        .flat_map(|transaction| [transaction.handle.clone(), transaction.destination.clone()])
        .filter(|address| !address.is_network())
        .collect();
    touched.sort();
    touched.dedup();
    touched
}
