use entity_store_core::{EntityId, StoreError};
use thiserror::Error;

/// A remote call that failed on every permitted attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed after {attempts} attempt(s): {source}")]
pub struct ExhaustedRetries {
    /// What was being attempted (for logs)
    pub operation: String,
    pub attempts: u32,
    /// Error of the last attempt
    #[source]
    pub source: StoreError,
}

/// Why an entity's record could not be made available.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Another process holds a fresh session lock. Not a store failure.
    #[error("session locked by another process")]
    LockContention { message: String },

    #[error("could not verify session lock")]
    IndeterminateLock(#[source] ExhaustedRetries),

    #[error("could not load data")]
    Data(#[source] ExhaustedRetries),

    #[error("stored record is malformed")]
    Malformed(#[source] StoreError),
}

impl LoadError {
    pub fn is_contention(&self) -> bool {
        matches!(self, LoadError::LockContention { .. })
    }
}

/// Why an entity's record could not be persisted.
#[derive(Error, Debug)]
pub enum SaveError {
    /// The entity left the cache before the save ran.
    #[error("entity {0} is not cached")]
    NotCached(EntityId),

    /// The entry is not backed by a session lock this process holds.
    #[error("entity {0} is not locked by this process")]
    NotLocked(EntityId),

    #[error("could not save data")]
    Exhausted(#[source] ExhaustedRetries),
}

impl SaveError {
    /// Whether the save was skipped rather than attempted and failed.
    pub fn is_skip(&self) -> bool {
        matches!(self, SaveError::NotCached(_) | SaveError::NotLocked(_))
    }
}

/// Invalid session settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("RETRY_ATTEMPTS must be at least 1")]
    ZeroRetryAttempts,

    #[error("AUTOSAVE_INTERVAL must be at least 1 second")]
    ZeroAutosaveInterval,
}
