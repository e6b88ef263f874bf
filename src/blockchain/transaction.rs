use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{hash_canonical, unix_timestamp, Address};

/// Payload key recording a profile name change
pub const NAME_KEY: &str = "name";

/// Payload key recording merged profile data
pub const USER_DATA_KEY: &str = "user-data";

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Corrupt transaction: claimed id {claimed}, recomputed {computed}")]
    CorruptTransaction { claimed: String, computed: String },
}

/// Represents a single ledger operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Originating address
    pub handle: Address,

    /// Free-form payload
    #[schema(value_type = Object)]
    pub data: Map<String, Value>,

    /// Value moved or charged
    pub amount: u64,

    /// Recipient address
    pub destination: Address,

    /// Creation time in seconds since the epoch
    pub timestamp: f64,

    /// Content-addressed identifier
    pub tx_id: String,
}

impl Transaction {
    /// Creates a new transaction and derives its id
    ///
    /// # Arguments
    ///
    /// * `handle` - The originating address
    /// * `data` - The payload
    /// * `amount` - The value moved or charged
    /// * `destination` - The recipient address
    /// * `timestamp` - Creation time, or `None` for now
    ///
    /// # Returns
    ///
    /// A new Transaction instance
    pub fn new(
        handle: Address,
        data: Map<String, Value>,
        amount: u64,
        destination: Address,
        timestamp: Option<f64>,
    ) -> Self {
        let timestamp = timestamp.unwrap_or_else(unix_timestamp);
        let tx_id = Self::compute_id(&handle, &data, amount, &destination, timestamp);

        Transaction {
            handle,
            data,
            amount,
            destination,
            timestamp,
            tx_id,
        }
    }

    /// Creates a treasury-authored transaction crediting `destination`
    pub fn from_network(destination: Address, message: &str, amount: u64, timestamp: Option<f64>) -> Self {
        Self::new(
            Address::network(),
            message_payload(message),
            amount,
            destination,
            timestamp,
        )
    }

    /// Creates the fee transaction recording a profile edit
    ///
    /// The payload carries the new name under `name` and the merged data
    /// under `user-data`, so the edit can be replayed from the chain.
    pub fn profile_edit(
        handle: Address,
        name: Option<String>,
        data: Option<Map<String, Value>>,
        fee: u64,
    ) -> Self {
        let mut payload = Map::new();
        if let Some(name) = name {
            payload.insert(NAME_KEY.to_string(), Value::String(name));
        }
        if let Some(data) = data {
            payload.insert(USER_DATA_KEY.to_string(), Value::Object(data));
        }

        Self::new(handle, payload, fee, Address::network(), None)
    }

    fn compute_id(
        handle: &Address,
        data: &Map<String, Value>,
        amount: u64,
        destination: &Address,
        timestamp: f64,
    ) -> String {
        hash_canonical(&json!({
            "handle": handle,
            "data": data,
            "amount": amount,
            "timestamp": timestamp,
            "destination": destination,
        }))
    }

    /// Recomputes the id from the hashed fields
    pub fn calculate_tx_id(&self) -> String {
        Self::compute_id(&self.handle, &self.data, self.amount, &self.destination, self.timestamp)
    }

    /// Checks that the claimed id matches the content
    pub fn verify_id(&self) -> Result<(), TransactionError> {
        let computed = self.calculate_tx_id();
        if computed != self.tx_id {
            return Err(TransactionError::CorruptTransaction {
                claimed: self.tx_id.clone(),
                computed,
            });
        }
        Ok(())
    }

    /// Wire representation, also used when embedding in a block hash
    pub fn encode(&self) -> Value {
        json!({
            "handle": self.handle,
            "data": self.data,
            "amount": self.amount,
            "destination": self.destination,
            "timestamp": self.timestamp,
            "tx_id": self.tx_id,
        })
    }

    /// Whether the treasury authored this transaction
    pub fn is_network_issued(&self) -> bool {
        self.handle.is_network()
    }

    /// Name change carried by an edit transaction
    pub fn edited_name(&self) -> Option<&str> {
        self.data.get(NAME_KEY).and_then(Value::as_str)
    }

    /// Profile data carried by an edit transaction
    pub fn edited_data(&self) -> Option<&Map<String, Value>> {
        self.data.get(USER_DATA_KEY).and_then(Value::as_object)
    }
}

/// `{"message": ...}` payload used by treasury transactions
pub fn message_payload(message: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("message".to_string(), Value::String(message.to_string()));
    payload
}
