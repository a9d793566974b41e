use std::sync::Arc;

use entity_store_core::{lock_key, Clock, EntityId, RemoteStore};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::SessionConfig;
use crate::error::ExhaustedRetries;
use crate::retry::RetryExecutor;

/// Stamp written on release. Always stale.
const RELEASED_STAMP: i64 = 0;

/// Result of a session-lock check.
#[derive(Debug)]
pub enum LockDecision {
    /// The lock was free or stale and has been stamped for this process.
    Granted,
    /// Another process holds a fresh lock. Carries the message for the entity.
    Rejected(String),
    /// The lock could not be read, so ownership is unknown. Never a grant.
    IndeterminateFailure(ExhaustedRetries),
}

impl LockDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockDecision::Granted)
    }
}

/// Timestamp-based session lock stored in the remote store.
///
/// Lock keys: `sessionlock_{entity_id}`, value: seconds since epoch of the
/// owner's last stamp. A lock is stale once it is `staleness` seconds old; the
/// owner refreshes it on every autosave, so a lock nobody refreshed for a whole
/// autosave interval belongs to a process that died or moved on.
pub struct SessionLockManager {
    store: Arc<dyn RemoteStore>,
    retry: RetryExecutor,
    clock: Arc<dyn Clock>,
    staleness: i64,
    kick_message: String,
}

impl SessionLockManager {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        retry: RetryExecutor,
        clock: Arc<dyn Clock>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            store,
            retry,
            clock,
            staleness: i64::try_from(config.autosave_interval_secs).unwrap_or(i64::MAX),
            kick_message: config.kick_message.clone(),
        }
    }

    /// Check the entity's lock and claim it if nobody holds a fresh one.
    #[instrument(skip(self), level = "debug")]
    pub async fn check_and_acquire(&self, entity: &EntityId) -> LockDecision {
        let key = lock_key(entity);

        let current = match self
            .retry
            .execute("session lock read", || self.store.get(&key))
            .await
        {
            Ok(value) => value,
            Err(err) => {
                warn!("Could not verify session lock for {}: {}", entity, err);
                return LockDecision::IndeterminateFailure(err);
            }
        };

        let now = self.clock.now();
        if let Some(stamped_at) = current.as_ref().and_then(|value| parse_stamp(entity, value)) {
            let age = now.saturating_sub(stamped_at);
            if age < self.staleness {
                debug!(
                    "Session lock on {} is fresh ({}s old, threshold {}s), rejecting",
                    entity, age, self.staleness
                );
                return LockDecision::Rejected(self.kick_message.clone());
            }
            debug!(
                "Session lock on {} is stale ({}s old), taking it over",
                entity, age
            );
        }

        // The data read that follows is the real gate, so a failed stamp is only logged
        self.stamp(entity, now).await;
        debug!("Acquired session lock on {} at {}", entity, now);
        LockDecision::Granted
    }

    /// Re-stamp the lock with the current time. Returns whether the write landed.
    #[instrument(skip(self), level = "debug")]
    pub async fn refresh(&self, entity: &EntityId) -> bool {
        self.stamp(entity, self.clock.now()).await
    }

    /// Mark the lock as free so another process can claim it immediately.
    #[instrument(skip(self), level = "debug")]
    pub async fn release(&self, entity: &EntityId) -> bool {
        let released = self.stamp(entity, RELEASED_STAMP).await;
        if released {
            debug!("Released session lock on {}", entity);
        }
        released
    }

    async fn stamp(&self, entity: &EntityId, at: i64) -> bool {
        let key = lock_key(entity);
        let value = Value::from(at);
        match self
            .retry
            .execute("session lock write", || self.store.set(&key, &value))
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!("Could not stamp session lock for {}: {}", entity, err);
                false
            }
        }
    }
}

/// Read a stored stamp. Malformed values are treated as no lock at all.
fn parse_stamp(entity: &EntityId, value: &Value) -> Option<i64> {
    let stamp = value
        .as_i64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()));
    if stamp.is_none() {
        warn!("Ignoring malformed session lock for {}: {}", entity, value);
    }
    stamp
}
