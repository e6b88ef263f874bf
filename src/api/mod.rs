// API module
//
// HTTP surface of the node: one handler per node operation, mounted under
// /api/v1 and documented with OpenAPI.

pub mod handlers;
pub mod routes;
pub mod schema;

pub use routes::configure_routes;
