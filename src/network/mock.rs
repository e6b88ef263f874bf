use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::client::{PeerClient, PeerError};

/// In-memory [`PeerClient`] with canned GET answers and recorded POSTs
#[derive(Default)]
pub struct MockPeerClient {
    responses: Mutex<HashMap<(String, String), Value>>,
    unreachable: Mutex<HashSet<String>>,
    posts: Mutex<Vec<(String, String, Value)>>,
}

impl MockPeerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers GET `path` on `peer` with `value`
    pub fn respond(&self, peer: &str, path: &str, value: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert((peer.to_string(), path.to_string()), value);
    }

    /// Makes every call to `peer` fail
    pub fn fail(&self, peer: &str) {
        self.unreachable.lock().unwrap().insert(peer.to_string());
    }

    /// Recorded POSTs to `path`, as (peer, body)
    pub fn posts_to(&self, path: &str) -> Vec<(String, Value)> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p, _)| p == path)
            .map(|(peer, _, body)| (peer.clone(), body.clone()))
            .collect()
    }

    fn check_reachable(&self, peer: &str) -> Result<(), PeerError> {
        if self.unreachable.lock().unwrap().contains(peer) {
            return Err(PeerError::Unreachable {
                peer: peer.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl PeerClient for MockPeerClient {
    async fn get_json(&self, peer: &str, path: &str) -> Result<Value, PeerError> {
        self.check_reachable(peer)?;

        self.responses
            .lock()
            .unwrap()
            .get(&(peer.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| PeerError::BadStatus {
                peer: peer.to_string(),
                status: 404,
            })
    }

    async fn post_json(&self, peer: &str, path: &str, body: &Value) -> Result<Value, PeerError> {
        self.check_reachable(peer)?;

        self.posts
            .lock()
            .unwrap()
            .push((peer.to_string(), path.to_string(), body.clone()));
        Ok(json!({"message": "ok"}))
    }
}
