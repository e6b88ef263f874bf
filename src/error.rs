use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::blockchain::pow::WorkError;
use crate::blockchain::{AccountError, ChainError, StorageError};
use crate::network::{PeerError, WireError};

/// Errors returned by node operations
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("{0}")]
    Chain(#[from] ChainError),

    #[error("{0}")]
    Peer(#[from] PeerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Proof search failed: {0}")]
    Work(#[from] WorkError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<WireError> for NodeError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Malformed(reason) => NodeError::MalformedInput(reason),
        }
    }
}

impl From<AccountError> for NodeError {
    fn from(err: AccountError) -> Self {
        NodeError::Chain(ChainError::AccountError(err))
    }
}

impl NodeError {
    /// Stable error kind reported to callers
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::MalformedInput(_) => "MalformedInput",
            NodeError::Chain(err) => match err {
                ChainError::TamperedBlock(_) => "HashMismatch",
                ChainError::OutOfOrderBlock { .. } | ChainError::OrphanBlock { .. } => "ChainLinkageViolation",
                ChainError::InvalidProof { .. } => "InvalidProof",
                ChainError::ExcessIssuance { .. } => "ExcessIssuance",
                ChainError::CorruptTransaction(_) => "CorruptTransaction",
                ChainError::DuplicateTransaction(_) => "DuplicateTransaction",
                ChainError::AccountError(AccountError::AccountNotFound(_)) => "AccountNotFound",
                ChainError::AccountError(AccountError::DuplicateAccount(_)) => "DuplicateAccount",
                ChainError::AccountError(AccountError::InsufficientBalance { .. }) => "InsufficientBalance",
                ChainError::AccountError(AccountError::BalanceOverflow(_)) => "BalanceOverflow",
                ChainError::InvalidGenesis => "InvalidGenesis",
                ChainError::NotLonger { .. } => "NotLonger",
            },
            NodeError::Peer(_) => "PeerUnreachable",
            NodeError::Storage(_) => "Storage",
            NodeError::Work(_) => "Unsolvable",
            NodeError::Internal(_) => "Internal",
        }
    }
}

impl ResponseError for NodeError {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            "MalformedInput" | "HashMismatch" | "InvalidProof" | "ExcessIssuance" | "CorruptTransaction"
            | "DuplicateTransaction" | "BalanceOverflow" | "InvalidGenesis" => StatusCode::BAD_REQUEST,
            "InsufficientBalance" => StatusCode::PAYMENT_REQUIRED,
            "AccountNotFound" => StatusCode::NOT_FOUND,
            "DuplicateAccount" | "ChainLinkageViolation" | "NotLonger" => StatusCode::CONFLICT,
            "PeerUnreachable" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }))
    }
}
