use dashmap::DashSet;
use futures::future::join_all;
use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::client::{PeerClient, PeerError, CHAIN_PATH, NEW_BLOCK_PATH, NEW_USER_PATH, NODES_PATH, REGISTER_NODE_PATH};
use super::wire::{decode, ChainExport, PeerList, RemoteChain};
use crate::blockchain::{Address, Block};

/// Outcome of a discovery round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    /// Peers learned this round
    pub added: Vec<String>,

    /// Peers dropped for not answering
    pub evicted: Vec<String>,
}

/// The set of reachable peers and the protocol run against them.
///
/// A peer that fails to answer any call is evicted at once; there is no
/// retry or backoff. The node's own address is never a member.
#[derive(Debug)]
pub struct PeerSet {
    peers: DashSet<String>,
    self_address: String,

    /// Serialises discovery rounds
    round: Mutex<()>,
}

impl PeerSet {
    /// Creates a peer set seeded with `initial`
    pub fn new<I>(self_address: impl Into<String>, initial: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let set = PeerSet {
            peers: DashSet::new(),
            self_address: self_address.into(),
            round: Mutex::new(()),
        };
        for peer in initial {
            set.add(peer);
        }
        set
    }

    /// Adds a peer
    ///
    /// # Returns
    ///
    /// true if the peer was not known before. Blank addresses and the node's
    /// own address are ignored.
    pub fn add(&self, peer: impl Into<String>) -> bool {
        let peer = peer.into().trim().to_string();
        if peer.is_empty() || peer == self.self_address {
            return false;
        }
        self.peers.insert(peer)
    }

    pub fn remove(&self, peer: &str) -> bool {
        self.peers.remove(peer).is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, peer: &str) -> bool {
        self.peers.contains(peer)
    }

    /// Known peers in sorted order
    pub fn list(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peers.iter().map(|peer| peer.key().clone()).collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peer list payload
    pub fn peer_list(&self) -> PeerList {
        PeerList { full_nodes: self.list() }
    }

    fn evict(&self, peer: &str, err: &PeerError) {
        if self.remove(peer) {
            warn!("Evicted peer {}: {}", peer, err);
        }
    }

    /// Asks every peer for its peer list and merges the answers.
    ///
    /// Peers that fail to answer, or answer with something that is not a
    /// peer list, are evicted.
    pub async fn discover(&self, client: &dyn PeerClient) -> DiscoveryReport {
        let _round = self.round.lock().await;
        let targets = self.list();

        let answers = join_all(targets.iter().map(|peer| client.get_json(peer, NODES_PATH))).await;

        let mut report = DiscoveryReport::default();
        for (peer, answer) in targets.iter().zip(answers) {
            let list = answer.and_then(|value| {
                decode::<PeerList>(value).map_err(|e| PeerError::InvalidResponse {
                    peer: peer.clone(),
                    reason: e.to_string(),
                })
            });

            match list {
                Ok(list) => {
                    for found in list.full_nodes {
                        if self.add(found.clone()) {
                            debug!("Learned peer {} from {}", found, peer);
                            report.added.push(found);
                        }
                    }
                }
                Err(err) => {
                    self.evict(peer, &err);
                    report.evicted.push(peer.clone());
                }
            }
        }

        if !report.added.is_empty() || !report.evicted.is_empty() {
            info!(
                "Discovery: {} peers added, {} evicted, {} known",
                report.added.len(),
                report.evicted.len(),
                self.len()
            );
        }
        report
    }

    /// Posts `body` to every peer, evicting the ones that fail
    ///
    /// # Returns
    ///
    /// How many peers accepted the call
    async fn post_all(&self, client: &dyn PeerClient, path: &str, body: &Value) -> usize {
        let targets = self.list();
        let answers = join_all(targets.iter().map(|peer| client.post_json(peer, path, body))).await;

        let mut delivered = 0;
        for (peer, answer) in targets.iter().zip(answers) {
            match answer {
                Ok(_) => delivered += 1,
                Err(err) => self.evict(peer, &err),
            }
        }
        delivered
    }

    /// Registers this node's address with every peer
    pub async fn announce(&self, client: &dyn PeerClient) -> usize {
        let body = json!({ "host": self.self_address });
        self.post_all(client, REGISTER_NODE_PATH, &body).await
    }

    /// Sends a freshly produced block to every peer
    pub async fn broadcast_block(&self, client: &dyn PeerClient, block: &Block) -> usize {
        let body = json!(block);
        let delivered = self.post_all(client, NEW_BLOCK_PATH, &body).await;
        debug!("Block {} delivered to {} peers", block.index, delivered);
        delivered
    }

    /// Tells every peer about a newly created account
    pub async fn broadcast_account(&self, client: &dyn PeerClient, address: &Address) -> usize {
        let body = json!({ "address": address });
        self.post_all(client, NEW_USER_PATH, &body).await
    }

    /// Collects every peer's chain and ranks the ones longer than `local_length`.
    ///
    /// Longer chains come first; equal lengths are ordered by the
    /// lexicographically smallest tip hash. An empty result means no peer
    /// has anything better. Unreachable peers are evicted; peers serving a
    /// malformed snapshot are skipped.
    pub async fn sync_chain(&self, client: &dyn PeerClient, local_length: usize) -> Vec<RemoteChain> {
        let targets = self.list();
        let answers = join_all(targets.iter().map(|peer| client.get_json(peer, CHAIN_PATH))).await;

        let mut candidates = Vec::new();
        for (peer, answer) in targets.iter().zip(answers) {
            let value = match answer {
                Ok(value) => value,
                Err(err) => {
                    self.evict(peer, &err);
                    continue;
                }
            };

            match decode::<ChainExport>(value).and_then(|export| export.into_remote_chain(peer)) {
                Ok(remote) if remote.len() > local_length => candidates.push(remote),
                Ok(remote) => debug!("Peer {} has {} blocks, local has {}", peer, remote.len(), local_length),
                Err(err) => warn!("Ignoring chain from {}: {}", peer, err),
            }
        }

        candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.tip_hash().cmp(b.tip_hash())));
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{pow, ChainStore};
    use crate::network::mock::MockPeerClient;

    fn chain_with(blocks: usize) -> ChainStore {
        let mut store = ChainStore::new();
        for _ in 0..blocks {
            let proof = pow::solve(store.last_block().proof).unwrap();
            store.mine_block(&Address::from("miner"), proof).unwrap();
        }
        store
    }

    fn export(store: &ChainStore) -> Value {
        serde_json::to_value(ChainExport::from_store(store)).unwrap()
    }

    #[test]
    fn test_add_ignores_self_and_duplicates() {
        let peers = PeerSet::new("me:1", vec!["a:1".to_string(), "me:1".to_string()]);

        assert!(!peers.add("a:1"));
        assert!(!peers.add("  "));
        assert!(peers.add("b:1"));
        assert_eq!(peers.list(), vec!["a:1".to_string(), "b:1".to_string()]);
    }

    #[actix_web::test]
    async fn test_discover_unions_and_evicts() {
        let client = MockPeerClient::new();
        client.respond("a:1", NODES_PATH, json!({"full_nodes": ["c:1", "me:1"]}));
        client.respond("b:1", NODES_PATH, json!({"full_nodes": ["c:1", "d:1"]}));
        client.fail("x:1");

        let peers = PeerSet::new("me:1", ["a:1", "b:1", "x:1"].map(String::from));
        let report = peers.discover(&client).await;

        assert_eq!(report.evicted, vec!["x:1".to_string()]);
        assert_eq!(report.added.len(), 2);
        assert_eq!(peers.list(), ["a:1", "b:1", "c:1", "d:1"].map(String::from).to_vec());
    }

    #[actix_web::test]
    async fn test_discover_evicts_malformed_answer() {
        let client = MockPeerClient::new();
        client.respond("a:1", NODES_PATH, json!({"nodes": "nope"}));

        let peers = PeerSet::new("me:1", vec!["a:1".to_string()]);
        peers.discover(&client).await;

        assert!(peers.is_empty());
    }

    #[actix_web::test]
    async fn test_announce_posts_own_address() {
        let client = MockPeerClient::new();
        client.fail("b:1");

        let peers = PeerSet::new("me:1", ["a:1", "b:1"].map(String::from));
        let delivered = peers.announce(&client).await;

        assert_eq!(delivered, 1);
        assert_eq!(
            client.posts_to(REGISTER_NODE_PATH),
            vec![("a:1".to_string(), json!({"host": "me:1"}))]
        );
        assert!(!peers.contains("b:1"));
    }

    #[actix_web::test]
    async fn test_broadcast_block_survives_failures() {
        let client = MockPeerClient::new();
        client.fail("a:1");

        let store = chain_with(1);
        let peers = PeerSet::new("me:1", ["a:1", "b:1", "c:1"].map(String::from));
        let delivered = peers.broadcast_block(&client, store.last_block()).await;

        assert_eq!(delivered, 2);
        let posts = client.posts_to(NEW_BLOCK_PATH);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].1["hash"], json!(store.last_block().hash));
    }

    #[actix_web::test]
    async fn test_broadcast_account() {
        let client = MockPeerClient::new();
        let peers = PeerSet::new("me:1", vec!["a:1".to_string()]);

        peers.broadcast_account(&client, &Address::from("A1")).await;

        assert_eq!(client.posts_to(NEW_USER_PATH), vec![("a:1".to_string(), json!({"address": "A1"}))]);
    }

    #[actix_web::test]
    async fn test_sync_chain_picks_longest() {
        let client = MockPeerClient::new();
        let short = chain_with(1);
        let long = chain_with(3);
        client.respond("a:1", CHAIN_PATH, export(&short));
        client.respond("b:1", CHAIN_PATH, export(&long));
        client.respond("c:1", CHAIN_PATH, json!({"blocks": 7}));
        client.fail("d:1");

        let peers = PeerSet::new("me:1", ["a:1", "b:1", "c:1", "d:1"].map(String::from));
        let candidates = peers.sync_chain(&client, 1).await;

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].peer, "b:1");
        assert_eq!(candidates[0].blocks, long.blocks());
        assert!(!peers.contains("d:1"));
        assert!(peers.contains("c:1"));
    }

    #[actix_web::test]
    async fn test_sync_chain_breaks_ties_by_tip_hash() {
        let client = MockPeerClient::new();
        let first = chain_with(2);
        let second = chain_with(2);
        client.respond("a:1", CHAIN_PATH, export(&first));
        client.respond("b:1", CHAIN_PATH, export(&second));

        let peers = PeerSet::new("me:1", ["a:1", "b:1"].map(String::from));
        let candidates = peers.sync_chain(&client, 1).await;

        let smallest = first.last_block().hash.clone().min(second.last_block().hash.clone());
        assert_eq!(candidates[0].tip_hash(), smallest);
    }

    #[actix_web::test]
    async fn test_sync_chain_no_improvement() {
        let client = MockPeerClient::new();
        client.respond("a:1", CHAIN_PATH, export(&chain_with(2)));

        let peers = PeerSet::new("me:1", vec!["a:1".to_string()]);
        assert!(peers.sync_chain(&client, 3).await.is_empty());
    }
}
