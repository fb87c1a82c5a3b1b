//! Deterministic cache keys.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{GatewayError, Result};

/// Namespace plus a fingerprint of the request parameters.
///
/// Parameters are serialized to JSON with object keys sorted at every level,
/// so `{"artist": "x", "limit": 10}` and `{"limit": 10, "artist": "x"}` map to
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    fingerprint: String,
}

impl CacheKey {
    pub fn new<P: Serialize + ?Sized>(namespace: &str, params: &P) -> Result<Self> {
        let value = serde_json::to_value(params)
            .map_err(|e| GatewayError::InvalidParams(e.to_string()))?;
        let canonical = serde_json::to_string(&canonicalize(value))
            .map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());

        Ok(Self {
            namespace: namespace.to_string(),
            fingerprint: format!("{:x}", hasher.finalize()),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.fingerprint)
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
