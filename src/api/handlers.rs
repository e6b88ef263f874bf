use actix_web::{web, HttpResponse};

use super::schema::{EditRequest, MessageResponse, RegisterPeerResponse};
use crate::blockchain::{Address, Block};
use crate::error::NodeError;
use crate::network::wire::{AddressRequest, HostRequest};
use crate::node::Node;

/// Shared node state
pub type NodeData = web::Data<Node>;

/// Create this node's account
///
/// Opens an account for the node identifier and announces it to peers
#[utoipa::path(
    get,
    path = "/api/v1/create",
    responses(
        (status = 201, description = "Account created", body = crate::blockchain::Account),
        (status = 409, description = "Account already exists", body = crate::api::schema::ErrorResponse)
    )
)]
pub async fn create_account(node: NodeData) -> Result<HttpResponse, NodeError> {
    let account = node.create_local_account().await?;
    Ok(HttpResponse::Created().json(account))
}

/// Register an account announced by a peer
#[utoipa::path(
    post,
    path = "/api/v1/user/add",
    request_body = AddressRequest,
    responses(
        (status = 201, description = "Account registered", body = crate::blockchain::Account),
        (status = 400, description = "Malformed request", body = crate::api::schema::ErrorResponse),
        (status = 409, description = "Account already exists", body = crate::api::schema::ErrorResponse)
    )
)]
pub async fn add_user(node: NodeData, body: web::Json<AddressRequest>) -> Result<HttpResponse, NodeError> {
    let account = node.register_remote_account(body.into_inner().address)?;
    Ok(HttpResponse::Created().json(account))
}

/// View an account
#[utoipa::path(
    get,
    path = "/api/v1/view/{address}",
    params(
        ("address" = String, Path, description = "Account address")
    ),
    responses(
        (status = 200, description = "Account found", body = crate::blockchain::Account),
        (status = 404, description = "No such account", body = crate::api::schema::ErrorResponse)
    )
)]
pub async fn view_account(node: NodeData, address: web::Path<String>) -> Result<HttpResponse, NodeError> {
    let account = node.view_account(&Address::from(address.into_inner()))?;
    Ok(HttpResponse::Ok().json(account))
}

/// Edit a profile
///
/// Charges the edit fee and queues the fee transaction for the next block
#[utoipa::path(
    post,
    path = "/api/v1/edit/{address}",
    params(
        ("address" = String, Path, description = "Account address")
    ),
    request_body = EditRequest,
    responses(
        (status = 200, description = "Profile updated", body = crate::node::EditReceipt),
        (status = 400, description = "Nothing to edit", body = crate::api::schema::ErrorResponse),
        (status = 402, description = "Balance below the edit fee", body = crate::api::schema::ErrorResponse),
        (status = 404, description = "No such account", body = crate::api::schema::ErrorResponse)
    )
)]
pub async fn edit_account(
    node: NodeData,
    address: web::Path<String>,
    body: web::Json<EditRequest>,
) -> Result<HttpResponse, NodeError> {
    let EditRequest { name, data } = body.into_inner();
    let receipt = node.edit_account(&Address::from(address.into_inner()), name, data)?;
    Ok(HttpResponse::Ok().json(receipt))
}

/// Mine the next block
///
/// Solves the work-gate, seals the pending transactions plus the reward and
/// broadcasts the block
#[utoipa::path(
    get,
    path = "/api/v1/mine",
    responses(
        (status = 200, description = "Block mined", body = Block),
        (status = 500, description = "Mining failed", body = crate::api::schema::ErrorResponse)
    )
)]
pub async fn mine(node: NodeData) -> Result<HttpResponse, NodeError> {
    let block = node.mine_next_block().await?;
    Ok(HttpResponse::Ok().json(block))
}

/// Export the full chain
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain snapshot", body = crate::network::ChainExport)
    )
)]
pub async fn get_chain(node: NodeData) -> Result<HttpResponse, NodeError> {
    Ok(HttpResponse::Ok().json(node.export_chain()?))
}

/// List known peers
#[utoipa::path(
    get,
    path = "/api/v1/nodes",
    responses(
        (status = 200, description = "Known peers", body = crate::network::PeerList)
    )
)]
pub async fn list_nodes(node: NodeData) -> HttpResponse {
    HttpResponse::Ok().json(node.list_peers())
}

/// Register a peer
#[utoipa::path(
    post,
    path = "/api/v1/nodes/register",
    request_body = HostRequest,
    responses(
        (status = 200, description = "Peer registered", body = RegisterPeerResponse),
        (status = 400, description = "Malformed request", body = crate::api::schema::ErrorResponse)
    )
)]
pub async fn register_node(node: NodeData, body: web::Json<HostRequest>) -> Result<HttpResponse, NodeError> {
    let added = node.register_peer(&body.host)?;
    Ok(HttpResponse::Ok().json(RegisterPeerResponse {
        message: "Node registered".to_string(),
        added,
    }))
}

/// Receive a block from a peer
///
/// The block is validated against the local tip before it is appended
#[utoipa::path(
    post,
    path = "/api/v1/block/new",
    request_body = Block,
    responses(
        (status = 200, description = "Block appended", body = MessageResponse),
        (status = 400, description = "Invalid block", body = crate::api::schema::ErrorResponse),
        (status = 409, description = "Block does not extend the local tip", body = crate::api::schema::ErrorResponse)
    )
)]
pub async fn new_block(node: NodeData, block: web::Json<Block>) -> Result<HttpResponse, NodeError> {
    node.receive_block(block.into_inner()).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("New Block Added")))
}

/// Run a synchronization round now
#[utoipa::path(
    post,
    path = "/api/v1/nodes/sync",
    responses(
        (status = 200, description = "Round finished", body = crate::node::SyncReport)
    )
)]
pub async fn sync_nodes(node: NodeData) -> Result<HttpResponse, NodeError> {
    let report = node.synchronize().await?;
    Ok(HttpResponse::Ok().json(report))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    use super::*;
    use crate::api::configure_routes;
    use crate::network::mock::MockPeerClient;

    fn node_data() -> NodeData {
        web::Data::new(Node::new(
            Address::from("N1"),
            "me:1".to_string(),
            vec![],
            Arc::new(MockPeerClient::new()),
        ))
    }

    macro_rules! app {
        ($data:expr) => {
            test::init_service(App::new().app_data($data.clone()).configure(configure_routes)).await
        };
    }

    #[actix_web::test]
    async fn test_create_and_view() {
        let data = node_data();
        let app = app!(data);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/create").to_request()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/create").to_request()).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "DuplicateAccount");

        let req = test::TestRequest::get().uri("/api/v1/view/N1").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["address"], "N1");
        assert_eq!(body["balance"], 100);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/view/nobody").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_edit_flow() {
        let data = node_data();
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/v1/user/add")
            .set_json(json!({"address": "A1"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/v1/edit/A1")
            .set_json(json!({"name": "X", "data": {"city": "Lagos"}}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["account"]["balance"], 80);
        assert_eq!(body["account"]["name"], "X");
        assert_eq!(body["account"]["data"]["city"], "Lagos");
        assert_eq!(body["transaction"]["amount"], 20);
        assert_eq!(body["transaction"]["destination"], "Network");

        let req = test::TestRequest::post().uri("/api/v1/edit/A1").set_json(json!({})).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let chain: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(chain["unconfirmed_transactions"].as_object().unwrap().len(), 1);
        assert_eq!(chain["accounts"]["A1"]["balance"], 80);
    }

    #[actix_web::test]
    async fn test_mine_and_export() {
        let data = node_data();
        let app = app!(data);

        let req = test::TestRequest::get().uri("/api/v1/mine").to_request();
        let block: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(block["index"], 1);
        assert_eq!(block["proof"], 9);

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let chain: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(chain["blocks"]["1"]["hash"], block["hash"]);
        assert_eq!(chain["accounts"]["N1"]["balance"], 300);
    }

    #[actix_web::test]
    async fn test_new_block_validation() {
        let producer = node_data();
        let block = producer.mine_next_block().await.unwrap();

        let data = node_data();
        let app = app!(data);

        let mut tampered = json!(block);
        tampered["proof"] = json!(18);
        let req = test::TestRequest::post().uri("/api/v1/block/new").set_json(&tampered).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "HashMismatch");

        let req = test::TestRequest::post().uri("/api/v1/block/new").set_json(&block).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::post().uri("/api/v1/block/new").set_json(&block).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn test_malformed_body() {
        let data = node_data();
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/v1/block/new")
            .set_json(json!({"index": "one"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "MalformedInput");
    }

    #[actix_web::test]
    async fn test_peer_routes() {
        let data = node_data();
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/v1/nodes/register")
            .set_json(json!({"host": "b:1"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["added"], true);

        let req = test::TestRequest::get().uri("/api/v1/nodes").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"full_nodes": ["b:1"]}));

        // b:1 has no canned answers in the mock, so the round evicts it
        let req = test::TestRequest::post().uri("/api/v1/nodes/sync").to_request();
        let report: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(report["adopted_from"], Value::Null);
        assert_eq!(report["length"], 1);
    }
}
