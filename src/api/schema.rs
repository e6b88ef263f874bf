use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Plain acknowledgement
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        MessageResponse { message: message.into() }
    }
}

/// Body of a profile edit; at least one field must be present
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EditRequest {
    /// New display name
    pub name: Option<String>,

    /// Keys merged into the profile data
    #[schema(value_type = Option<Object>)]
    pub data: Option<Map<String, Value>>,
}

/// Body of a peer registration answer
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterPeerResponse {
    pub message: String,

    /// false if the peer was already known or is this node
    pub added: bool,
}

/// Error body returned by every failing route
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Stable error kind, e.g. `InsufficientBalance`
    pub error: String,

    /// Human readable detail
    pub message: String,
}
