//! Lenient field access for entity payloads.
//!
//! Payloads come from other devices and older builds. Reads never fail:
//! a missing or mistyped field yields the caller's default.

use serde_json::Value;
use sync_types::{DistributedId, Payload};

/// Read a string field. Numbers and booleans are rendered as text.
pub fn string(payload: &Payload, key: &str) -> String {
    match payload.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn int_opt(payload: &Payload, key: &str) -> Option<i64> {
    match payload.get(key) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read an integer field, accepting JSON numbers and numeric strings.
pub fn int(payload: &Payload, key: &str, default: i64) -> i64 {
    int_opt(payload, key).unwrap_or(default)
}

/// Read an integer field into a narrower type, falling back when out of range.
pub fn int_as<T: TryFrom<i64>>(payload: &Payload, key: &str, default: T) -> T {
    int_opt(payload, key)
        .and_then(|raw| T::try_from(raw).ok())
        .unwrap_or(default)
}

/// Read a floating point field, accepting JSON numbers and numeric strings.
pub fn float(payload: &Payload, key: &str, default: f64) -> f64 {
    match payload.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Read a boolean field, accepting `true/false`, `"true"/"false"`, `"1"/"0"` and `1/0`.
pub fn boolean(payload: &Payload, key: &str, default: bool) -> bool {
    match payload.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => false,
            Some(1) => true,
            _ => default,
        },
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => default,
        },
        _ => default,
    }
}

/// Read an optional distributed id. Empty strings count as absent.
pub fn distributed_id(payload: &Payload, key: &str) -> Option<DistributedId> {
    match payload.get(key) {
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Read the entity's own distributed id, minting one when absent.
pub fn identity(payload: &Payload) -> DistributedId {
    distributed_id(payload, IDENTITY_KEY).unwrap_or_default()
}

/// Payload key of every entity's distributed identity.
pub const IDENTITY_KEY: &str = "distributedId";

/// Incremental payload writer.
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    payload: Payload,
}

impl PayloadBuilder {
    /// Start a payload with the entity's identity.
    pub fn new(id: &DistributedId) -> Self {
        let mut payload = Payload::new();
        payload.insert(IDENTITY_KEY.to_string(), Value::from(id.as_str()));
        Self { payload }
    }

    /// Set a field.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Set a reference field. Absent references are omitted.
    pub fn reference(mut self, key: &str, id: Option<&DistributedId>) -> Self {
        if let Some(id) = id {
            self.payload.insert(key.to_string(), Value::from(id.as_str()));
        }
        self
    }

    /// Finish.
    pub fn build(self) -> Payload {
        self.payload
    }
}
