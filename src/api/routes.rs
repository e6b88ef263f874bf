use actix_web::{error, web, HttpRequest};

use super::handlers;
use crate::error::NodeError;
use crate::network::client::API_PREFIX;

/// Reports undecodable JSON bodies as malformed input
fn json_error(err: error::JsonPayloadError, _req: &HttpRequest) -> error::Error {
    NodeError::MalformedInput(err.to_string()).into()
}

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope(API_PREFIX)
            .app_data(web::JsonConfig::default().error_handler(json_error))
            .route("/create", web::get().to(handlers::create_account))
            .route("/user/add", web::post().to(handlers::add_user))
            .route("/view/{address}", web::get().to(handlers::view_account))
            .route("/edit/{address}", web::post().to(handlers::edit_account))
            .route("/mine", web::get().to(handlers::mine))
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/nodes", web::get().to(handlers::list_nodes))
            .route("/nodes/register", web::post().to(handlers::register_node))
            .route("/nodes/sync", web::post().to(handlers::sync_nodes))
            .route("/block/new", web::post().to(handlers::new_block)),
    );
}
