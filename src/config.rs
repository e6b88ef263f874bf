// Node configuration
//
// Read from PEOPLESCHAIN_* environment variables, with a `.env` file in the
// working directory loaded first if present.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 19003;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_PEER_TIMEOUT_SECS: u64 = 5;

/// Errors that can occur while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue { key: String, value: String, reason: String },
}

/// Node settings
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Identifier and account address of this node; generated when unset
    pub node_id: Option<String>,

    /// Interface the HTTP server binds to
    pub host: String,

    /// Port the HTTP server binds to
    pub port: u16,

    /// Address announced to peers
    pub public_address: String,

    /// Initial peers
    pub peers: Vec<String>,

    /// Directory of the persistent store; in-memory only when unset
    pub data_dir: Option<PathBuf>,

    /// Period of background synchronization; zero disables it
    pub sync_interval: Duration,

    /// Timeout of every peer call
    pub peer_timeout: Duration,
}

impl NodeConfig {
    /// Loads `.env` if present, then reads the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source
    ///
    /// # Arguments
    ///
    /// * `lookup` - Returns the value of a variable, or `None` if unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = parse_or(&var, "PEOPLESCHAIN_PORT", DEFAULT_PORT)?;
        let sync_interval = parse_or(&var, "PEOPLESCHAIN_SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS)?;
        let peer_timeout = parse_or(&var, "PEOPLESCHAIN_PEER_TIMEOUT_SECS", DEFAULT_PEER_TIMEOUT_SECS)?;

        let peers = var("PEOPLESCHAIN_PEERS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|peer| !peer.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(NodeConfig {
            node_id: var("PEOPLESCHAIN_NODE_ID"),
            host: var("PEOPLESCHAIN_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            public_address: var("PEOPLESCHAIN_PUBLIC_ADDR").unwrap_or_else(|| format!("127.0.0.1:{}", port)),
            peers,
            data_dir: var("PEOPLESCHAIN_DATA_DIR").map(PathBuf::from),
            sync_interval: Duration::from_secs(sync_interval),
            peer_timeout: Duration::from_secs(peer_timeout),
        })
    }

    /// A fresh random node identifier: 32 lowercase hex digits
    pub fn generate_node_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
