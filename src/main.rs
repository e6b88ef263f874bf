use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;
mod error;
mod network;
mod node;

use blockchain::{Address, ChainStorage};
use config::NodeConfig;
use network::{HttpPeerClient, PeerClient};
use node::Node;

/// Builds the node, resuming from storage when a data directory is configured
fn initialize_node(config: &NodeConfig) -> anyhow::Result<Node> {
    let client: Arc<dyn PeerClient> = Arc::new(HttpPeerClient::new(config.peer_timeout));

    let Some(data_dir) = &config.data_dir else {
        let node_id = config.node_id.clone().unwrap_or_else(NodeConfig::generate_node_id);
        info!("Running in memory as node {}", node_id);
        return Ok(Node::new(
            Address::from(node_id),
            config.public_address.clone(),
            config.peers.clone(),
            client,
        ));
    };

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let storage = ChainStorage::open(data_dir)
        .with_context(|| format!("failed to open storage at {}", data_dir.display()))?;

    let node_id = match (&config.node_id, storage.node_id()?) {
        (Some(configured), _) => configured.clone(),
        (None, Some(stored)) => stored,
        (None, None) => NodeConfig::generate_node_id(),
    };
    storage.save_node_id(&node_id)?;
    info!("Node {} using storage at {}", node_id, data_dir.display());

    let node = Node::with_storage(
        Address::from(node_id),
        config.public_address.clone(),
        config.peers.clone(),
        client,
        storage,
    )?;
    Ok(node)
}

/// Runs one synchronization round at startup, then one per interval
fn spawn_sync_loop(node: web::Data<Node>, interval: std::time::Duration) {
    actix_web::rt::spawn(async move {
        if let Err(err) = node.synchronize().await {
            warn!("Startup synchronization failed: {}", err);
        }

        if interval.is_zero() {
            return;
        }

        let mut ticker = actix_web::rt::time::interval(interval);
        // The first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match node.synchronize().await {
                Ok(report) => {
                    if let Some(peer) = report.adopted_from {
                        info!("Periodic sync adopted chain of length {} from {}", report.length, peer);
                    }
                }
                Err(err) => warn!("Periodic synchronization failed: {}", err),
            }
        }
    });
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::create_account,
        api::handlers::add_user,
        api::handlers::view_account,
        api::handlers::edit_account,
        api::handlers::mine,
        api::handlers::get_chain,
        api::handlers::list_nodes,
        api::handlers::register_node,
        api::handlers::new_block,
        api::handlers::sync_nodes
    ),
    components(
        schemas(
            blockchain::Account,
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            network::ChainExport,
            network::PeerList,
            network::wire::HostRequest,
            network::wire::AddressRequest,
            node::EditReceipt,
            node::SyncReport,
            api::schema::MessageResponse,
            api::schema::EditRequest,
            api::schema::RegisterPeerResponse,
            api::schema::ErrorResponse
        )
    ),
    tags(
        (name = "peopleschain", description = "Ledger node API endpoints")
    ),
    info(
        title = "Peopleschain Node API",
        version = "1.0.0",
        description = "Account ledger node with proof-of-work blocks and peer synchronization",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::from_env()?;
    let node = web::Data::new(initialize_node(&config)?);

    spawn_sync_loop(node.clone(), config.sync_interval);

    info!(
        "Starting HTTP server at http://{}:{} (public address {})",
        config.host, config.port, config.public_address
    );

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(node.clone())
            .configure(api::configure_routes)
            .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
