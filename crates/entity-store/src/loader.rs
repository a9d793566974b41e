use std::sync::Arc;

use entity_store_core::{data_key, EntityId, Record, RemoteStore};
use tracing::{debug, info, instrument};

use crate::cache::{CacheEntry, EntityCache};
use crate::error::LoadError;
use crate::lock::{LockDecision, SessionLockManager};
use crate::retry::RetryExecutor;

/// Brings an entity's record into the cache: session lock first, then data.
pub struct DataLoader {
    store: Arc<dyn RemoteStore>,
    retry: RetryExecutor,
    locks: Arc<SessionLockManager>,
    cache: Arc<EntityCache>,
}

impl DataLoader {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        retry: RetryExecutor,
        locks: Arc<SessionLockManager>,
        cache: Arc<EntityCache>,
    ) -> Self {
        Self {
            store,
            retry,
            locks,
            cache,
        }
    }

    /// Acquire the entity's session lock, read its record and install it.
    ///
    /// A first-time entity gets a copy of `template`. The entry only becomes
    /// visible in the cache once everything succeeded. Callers must not invoke
    /// this for an entity that is already cached.
    #[instrument(skip(self, template), level = "debug")]
    pub async fn load(&self, entity: &EntityId, template: &Record) -> Result<Record, LoadError> {
        match self.locks.check_and_acquire(entity).await {
            LockDecision::Granted => {}
            LockDecision::Rejected(message) => return Err(LoadError::LockContention { message }),
            LockDecision::IndeterminateFailure(err) => return Err(LoadError::IndeterminateLock(err)),
        }

        let record = match self.read(entity, template).await {
            Ok(record) => record,
            Err(err) => {
                // We stamped the lock but never owned any data; let the next attempt in
                self.locks.release(entity).await;
                return Err(err);
            }
        };

        self.cache
            .install(entity.clone(), CacheEntry::locked(record.clone()));
        info!("Loaded {} ({} fields)", entity, record.len());
        Ok(record)
    }

    async fn read(&self, entity: &EntityId, template: &Record) -> Result<Record, LoadError> {
        let key = data_key(entity);
        let stored = self
            .retry
            .execute("data read", || self.store.get(&key))
            .await
            .map_err(LoadError::Data)?;

        match stored {
            Some(value) => Record::from_value(value).map_err(LoadError::Malformed),
            None => {
                debug!("No stored record for {}, starting from template", entity);
                Ok(template.clone())
            }
        }
    }
}
