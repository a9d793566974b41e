use std::sync::Arc;

use entity_store_core::{data_key, EntityId, Record, RemoteStore};
use tracing::{debug, instrument};

use crate::cache::EntityCache;
use crate::error::SaveError;
use crate::lock::SessionLockManager;
use crate::retry::RetryExecutor;

/// The save routine shared by autosave, entity departure and shutdown flush.
pub struct EntitySaver {
    store: Arc<dyn RemoteStore>,
    retry: RetryExecutor,
    locks: Arc<SessionLockManager>,
    cache: Arc<EntityCache>,
}

impl EntitySaver {
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

    /// Refresh the entity's session lock, then persist its cached record.
    ///
    /// The lock refresh is best-effort; only the record write decides the
    /// outcome. Entries not backed by our lock are skipped.
    #[instrument(skip(self), level = "debug")]
    pub async fn save(&self, entity: &EntityId) -> Result<(), SaveError> {
        let entry = self
            .cache
            .entry(entity)
            .ok_or_else(|| SaveError::NotCached(entity.clone()))?;
        if !entry.locked {
            return Err(SaveError::NotLocked(entity.clone()));
        }

        self.locks.refresh(entity).await;
        self.write(entity, entry.record).await
    }

    /// Release the entity's session lock after its final save.
    pub async fn release(&self, entity: &EntityId) -> bool {
        self.locks.release(entity).await
    }

    async fn write(&self, entity: &EntityId, record: Record) -> Result<(), SaveError> {
        let key = data_key(entity);
        let value = record.into_value();
        self.retry
            .execute("data write", || self.store.set(&key, &value))
            .await
            .map_err(SaveError::Exhausted)?;
        debug!("Saved {}", entity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::config::SessionConfig;
    use entity_store_core::{ManualClock, MemoryStore, StoreOp};
    use serde_json::json;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000;

    fn setup() -> (EntitySaver, Arc<EntityCache>, MemoryStore, ManualClock) {
        let store = MemoryStore::new();
        let remote: Arc<dyn RemoteStore> = Arc::new(store.clone());
        let clock = ManualClock::new(T0);
        let retry = RetryExecutor::new(3, Duration::from_secs(2));
        let locks = Arc::new(SessionLockManager::new(
            Arc::clone(&remote),
            retry.clone(),
            Arc::new(clock.clone()),
            &SessionConfig::default(),
        ));
        let cache = Arc::new(EntityCache::new());
        let saver = EntitySaver::new(remote, retry, locks, Arc::clone(&cache));
        (saver, cache, store, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_refreshes_lock_and_writes_record() {
        let (saver, cache, store, clock) = setup();
        let entity = EntityId::from("1");
        cache.install(entity.clone(), CacheEntry::locked(Record::new().with("score", 7)));

        clock.advance(30);
        saver.save(&entity).await.unwrap();

        assert_eq!(store.value("user_1"), Some(json!({"score": 7})));
        assert_eq!(store.value("sessionlock_1"), Some(json!(T0 + 30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_refresh_failure_does_not_block_save() {
        let (saver, cache, store, _clock) = setup();
        let entity = EntityId::from("1");
        cache.install(entity.clone(), CacheEntry::locked(Record::new()));
        store.fail_next(StoreOp::Set, "sessionlock_1", 3);

        saver.save(&entity).await.unwrap();
        assert_eq!(store.value("user_1"), Some(json!({})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_write_is_reported() {
        let (saver, cache, store, _clock) = setup();
        let entity = EntityId::from("1");
        cache.install(entity.clone(), CacheEntry::locked(Record::new()));
        store.fail_next(StoreOp::Set, "user_1", 3);

        let err = saver.save(&entity).await.unwrap_err();
        assert!(matches!(err, SaveError::Exhausted(ref e) if e.attempts == 3));
        assert!(!err.is_skip());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncached_and_unlocked_entries_are_skipped() {
        let (saver, cache, store, _clock) = setup();
        let err = saver.save(&EntityId::from("gone")).await.unwrap_err();
        assert!(matches!(err, SaveError::NotCached(_)));
        assert!(err.is_skip());

        let pending = EntityId::from("pending");
        cache.install(
            pending.clone(),
            CacheEntry {
                record: Record::new(),
                locked: false,
            },
        );
        let err = saver.save(&pending).await.unwrap_err();
        assert!(matches!(err, SaveError::NotLocked(_)));
        assert!(store.keys().is_empty());
    }
}
