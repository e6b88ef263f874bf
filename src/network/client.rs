use std::time::Duration;

use actix_web::error::PayloadError;
use actix_web::web::Bytes;
use async_trait::async_trait;
use awc::ClientResponse;
use futures::Stream;
use log::debug;
use serde_json::Value;
use thiserror::Error;

/// Prefix every node serves its routes under
pub const API_PREFIX: &str = "/api/v1";

pub const NODES_PATH: &str = "/nodes";
pub const REGISTER_NODE_PATH: &str = "/nodes/register";
pub const NEW_BLOCK_PATH: &str = "/block/new";
pub const NEW_USER_PATH: &str = "/user/add";
pub const CHAIN_PATH: &str = "/chain";

/// Largest response body accepted from a peer
const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// Errors that can occur while talking to a peer
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("Peer {peer} answered with status {status}")]
    BadStatus { peer: String, status: u16 },

    #[error("Peer {peer} sent an invalid response: {reason}")]
    InvalidResponse { peer: String, reason: String },
}

/// Sends JSON to a peer and returns its JSON answer
#[async_trait(?Send)]
pub trait PeerClient: Send + Sync {
    /// GETs `path` on `peer`
    async fn get_json(&self, peer: &str, path: &str) -> Result<Value, PeerError>;

    /// POSTs `body` to `path` on `peer`
    async fn post_json(&self, peer: &str, path: &str, body: &Value) -> Result<Value, PeerError>;
}

/// [`PeerClient`] speaking HTTP to `http://<peer>/api/v1<path>`
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    timeout: Duration,
}

impl HttpPeerClient {
    /// Creates a client whose calls fail after `timeout`
    pub fn new(timeout: Duration) -> Self {
        HttpPeerClient { timeout }
    }

    fn client(&self) -> awc::Client {
        awc::Client::builder().timeout(self.timeout).finish()
    }

    fn url(peer: &str, path: &str) -> String {
        format!("http://{}{}{}", peer, API_PREFIX, path)
    }

    async fn read_json<S>(peer: &str, mut response: ClientResponse<S>) -> Result<Value, PeerError>
    where
        S: Stream<Item = Result<Bytes, PayloadError>> + Unpin,
    {
        if !response.status().is_success() {
            return Err(PeerError::BadStatus {
                peer: peer.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .json::<Value>()
            .limit(MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| PeerError::InvalidResponse {
                peer: peer.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait(?Send)]
impl PeerClient for HttpPeerClient {
    async fn get_json(&self, peer: &str, path: &str) -> Result<Value, PeerError> {
        let url = Self::url(peer, path);
        debug!("GET {}", url);

        let response = self
            .client()
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| PeerError::Unreachable {
                peer: peer.to_string(),
                reason: e.to_string(),
            })?;

        Self::read_json(peer, response).await
    }

    async fn post_json(&self, peer: &str, path: &str, body: &Value) -> Result<Value, PeerError> {
        let url = Self::url(peer, path);
        debug!("POST {}", url);

        let response = self
            .client()
            .post(url.as_str())
            .send_json(body)
            .await
            .map_err(|e| PeerError::Unreachable {
                peer: peer.to_string(),
                reason: e.to_string(),
            })?;

        Self::read_json(peer, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{web, App, HttpResponse, HttpServer};
    use serde_json::json;

    #[test]
    fn test_url() {
        assert_eq!(
            HttpPeerClient::url("10.0.0.2:19003", NODES_PATH),
            "http://10.0.0.2:19003/api/v1/nodes"
        );
    }

    #[actix_web::test]
    async fn test_unreachable_peer() {
        let client = HttpPeerClient::new(Duration::from_millis(500));

        // Port 9 (discard) is closed on test machines
        let result = client.get_json("127.0.0.1:9", NODES_PATH).await;
        assert!(matches!(result, Err(PeerError::Unreachable { .. })));
    }

    #[actix_web::test]
    async fn test_roundtrip_against_server() {
        let server = HttpServer::new(|| {
            App::new().service(
                web::scope(API_PREFIX)
                    .route(
                        NODES_PATH,
                        web::get().to(|| async { HttpResponse::Ok().json(json!({"full_nodes": ["a:1"]})) }),
                    )
                    .route(
                        REGISTER_NODE_PATH,
                        web::post().to(|body: web::Json<Value>| async move { HttpResponse::Ok().json(body.into_inner()) }),
                    ),
            )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let address = server.addrs()[0];
        let handle = server.run();
        let server_handle = handle.handle();
        actix_web::rt::spawn(handle);

        let client = HttpPeerClient::new(Duration::from_secs(5));
        let peer = address.to_string();

        let nodes = client.get_json(&peer, NODES_PATH).await.unwrap();
        assert_eq!(nodes, json!({"full_nodes": ["a:1"]}));

        let echoed = client
            .post_json(&peer, REGISTER_NODE_PATH, &json!({"host": "b:2"}))
            .await
            .unwrap();
        assert_eq!(echoed, json!({"host": "b:2"}));

        let missing = client.get_json(&peer, CHAIN_PATH).await;
        assert!(matches!(missing, Err(PeerError::BadStatus { status: 404, .. })));

        server_handle.stop(true).await;
    }
}
