use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Address of the protocol treasury. Rewards and genesis transactions
/// originate here and profile edit fees are routed here.
pub const NETWORK_ADDRESS: &str = "Network";

/// Represents a participant address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// The treasury address
    pub fn network() -> Self {
        Address(NETWORK_ADDRESS.to_string())
    }

    /// Whether this is the treasury address
    pub fn is_network(&self) -> bool {
        self.0 == NETWORK_ADDRESS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

/// Canonical JSON text of a value.
///
/// Object keys are emitted in sorted order at every nesting level, so the
/// result does not depend on how the value was built. Arrays keep their order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 of the input rendered as lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash of the canonical encoding of a value
pub fn hash_canonical(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

static LAST_TIMESTAMP_MICROS: AtomicI64 = AtomicI64::new(0);

/// Current time in seconds since the epoch, with microsecond precision.
///
/// Strictly increasing within a process, so two transactions built from the
/// same fields in quick succession still get distinct ids.
pub fn unix_timestamp() -> f64 {
    let now = Utc::now().timestamp_micros();
    let previous = LAST_TIMESTAMP_MICROS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
        .unwrap_or(now);

    now.max(previous + 1) as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": [3, {"y": 1, "x": 2}], "c": null}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":null,"z":[3,{"x":2,"y":1}]},"b":1}"#
        );
    }

    #[test]
    fn test_canonical_json_ignores_insertion_order() {
        let mut first = Map::new();
        first.insert("handle".to_string(), json!("A1"));
        first.insert("amount".to_string(), json!(20));

        let mut second = Map::new();
        second.insert("amount".to_string(), json!(20));
        second.insert("handle".to_string(), json!("A1"));

        assert_eq!(
            hash_canonical(&Value::Object(first)),
            hash_canonical(&Value::Object(second))
        );
    }

    #[test]
    fn test_canonical_json_escapes_strings() {
        let value = json!({"msg": "quote \" and \n newline"});
        let text = canonical_json(&value);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_unix_timestamp_is_strictly_increasing() {
        let stamps: Vec<f64> = (0..1000).map(|_| unix_timestamp()).collect();
        assert!(stamps.windows(2).all(|pair| pair[1] > pair[0]));
    }

    #[test]
    fn test_network_address() {
        assert!(Address::network().is_network());
        assert!(!Address::from("A1").is_network());
        assert_eq!(serde_json::to_string(&Address::from("A1")).unwrap(), "\"A1\"");
    }
}
