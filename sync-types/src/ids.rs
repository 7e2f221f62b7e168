//! Identity types for Tabula sync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SyncError;

fn parse_non_empty(s: &str, what: &str) -> Result<String, SyncError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(SyncError::InvalidData(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn short(s: &str) -> String {
    s.chars().take(8).collect()
}

/// A unique identifier for one installation of the app.
///
/// Generated once as a random 128-bit UUID. Doubles as the HLC node id and
/// as the provenance tag on outbound messages.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new random DeviceId.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the string form of this DeviceId.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DeviceId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_non_empty(s, "device id").map(Self)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", short(&self.0))
    }
}

/// A cross-device identity for an entity.
///
/// Stable for the lifetime of the entity and independent of any local
/// storage key. Assigned once on creation, never rewritten by merges.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistributedId(String);

impl DistributedId {
    /// Create a new random DistributedId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the string form of this DistributedId.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DistributedId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for DistributedId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_non_empty(s, "distributed id").map(Self)
    }
}

impl fmt::Display for DistributedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DistributedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DistributedId({})", short(&self.0))
    }
}

/// A device-local storage key.
///
/// Derived by the local store and never transmitted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(i64);

impl LocalId {
    /// Wrap a storage row key.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this LocalId.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", self.0)
    }
}

/// The account that owns a piece of data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a UserId from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the string form of this UserId.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
