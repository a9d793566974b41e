use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix of the key holding an entity's record.
pub const DATA_KEY_PREFIX: &str = "user_";
/// Prefix of the key holding an entity's session-lock timestamp.
pub const LOCK_KEY_PREFIX: &str = "sessionlock_";

/// Identifier of an entity (e.g. a user account).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Get the store key for an entity's record.
pub fn data_key(entity: &EntityId) -> String {
    format!("{}{}", DATA_KEY_PREFIX, entity)
}

/// Get the store key for an entity's session lock.
pub fn lock_key(entity: &EntityId) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, entity)
}
