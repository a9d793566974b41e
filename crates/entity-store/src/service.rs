use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use entity_store_core::{Clock, EntityId, Record, RemoteStore, SystemClock};
use tracing::{info, warn};

use crate::autosave::{AutosaveHandle, AutosaveScheduler, SweepReport};
use crate::cache::EntityCache;
use crate::config::SessionConfig;
use crate::error::{ConfigError, LoadError, SaveError};
use crate::gate::EntityGates;
use crate::host::EntityHost;
use crate::loader::DataLoader;
use crate::lock::SessionLockManager;
use crate::notify::{Subscription, UpdateStream};
use crate::retry::RetryExecutor;
use crate::saver::EntitySaver;
use crate::shutdown::{FlushReport, ShutdownCoordinator};

struct Inner {
    config: SessionConfig,
    host: Arc<dyn EntityHost>,
    cache: Arc<EntityCache>,
    gates: Arc<EntityGates>,
    loader: DataLoader,
    saver: Arc<EntitySaver>,
    autosave: Arc<AutosaveScheduler>,
    autosave_handle: Mutex<Option<AutosaveHandle>>,
    shutdown: ShutdownCoordinator,
}

/// Session-locked entity records over a remote store.
///
/// One instance per process. Clones share the same cache, locks and autosave
/// loop.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<Inner>,
}

impl EntityStore {
    /// Build the layer over `store`, judging lock freshness by the system clock.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        host: Arc<dyn EntityHost>,
        config: SessionConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(store, host, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        store: Arc<dyn RemoteStore>,
        host: Arc<dyn EntityHost>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let retry = RetryExecutor::from_config(&config);
        let locks = Arc::new(SessionLockManager::new(
            Arc::clone(&store),
            retry.clone(),
            clock,
            &config,
        ));
        let cache = Arc::new(EntityCache::new());
        let gates = Arc::new(EntityGates::new());

        let loader = DataLoader::new(
            Arc::clone(&store),
            retry.clone(),
            Arc::clone(&locks),
            Arc::clone(&cache),
        );
        let saver = Arc::new(EntitySaver::new(
            Arc::clone(&store),
            retry,
            locks,
            Arc::clone(&cache),
        ));
        let autosave = Arc::new(AutosaveScheduler::new(
            Arc::clone(&saver),
            Arc::clone(&cache),
            Arc::clone(&gates),
            config.autosave_interval(),
        ));
        let shutdown = ShutdownCoordinator::new(
            Arc::clone(&saver),
            Arc::clone(&cache),
            Arc::clone(&gates),
            config.shutdown_deadline(),
        );

        info!(
            "Entity store ready (backend: {}, autosave every {}s, {} attempts per call)",
            store.backend_name(),
            config.autosave_interval_secs,
            config.retry_attempts
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                host,
                cache,
                gates,
                loader,
                saver,
                autosave,
                autosave_handle: Mutex::new(None),
                shutdown,
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The entity's record, loading it on first access.
    ///
    /// On failure the host evicts the entity, with the kick message when
    /// another process holds its lock and the generic message otherwise, and
    /// `None` is returned. Nothing is cached for a failed load.
    pub async fn get_data(&self, entity: &EntityId, template: &Record) -> Option<Record> {
        match self.try_get_data(entity, template).await {
            Ok(record) => Some(record),
            Err(err) => {
                let reason = match &err {
                    LoadError::LockContention { message } => {
                        info!("{} is active elsewhere, rejecting", entity);
                        message.as_str()
                    }
                    _ => {
                        warn!("Failed to load {}: {}", entity, err);
                        self.inner.config.load_failure_message.as_str()
                    }
                };
                self.inner.host.evict(entity, reason);
                None
            }
        }
    }

    /// Like [`get_data`](Self::get_data), but hands the failure to the caller
    /// instead of the host.
    pub async fn try_get_data(&self, entity: &EntityId, template: &Record) -> Result<Record, LoadError> {
        if let Some(record) = self.inner.cache.get(entity) {
            return Ok(record);
        }

        self.inner
            .gates
            .run(entity, || async {
                // Someone else may have finished the load while we waited
                if let Some(record) = self.inner.cache.get(entity) {
                    return Ok(record);
                }
                self.inner.loader.load(entity, template).await
            })
            .await
    }

    /// The cached record, without ever loading.
    pub fn cached(&self, entity: &EntityId) -> Option<Record> {
        self.inner.cache.get(entity)
    }

    /// Apply `transform` to the cached record and notify subscribers.
    /// Returns `None` when the entity is not loaded.
    pub fn update_data<F>(&self, entity: &EntityId, transform: F) -> Option<Record>
    where
        F: FnOnce(Record) -> Record,
    {
        self.inner.cache.update(entity, transform)
    }

    pub fn on_data_updated<F>(&self, entity: &EntityId, callback: F) -> Subscription
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        self.inner.cache.subscribe(entity, callback)
    }

    pub fn data_updates(&self, entity: &EntityId) -> UpdateStream {
        self.inner.cache.updates(entity)
    }

    /// Entity ids currently cached, sorted.
    pub fn active_entities(&self) -> Vec<EntityId> {
        self.inner.cache.entities()
    }

    /// The entity left: save its record one last time and drop it from the cache.
    ///
    /// The lock is released only when the save landed; otherwise it is left to
    /// expire so no other process loads an outdated record before then.
    pub async fn entity_departed(&self, entity: &EntityId) -> Result<(), SaveError> {
        self.inner
            .gates
            .run(entity, || async {
                let outcome = self.inner.saver.save(entity).await;
                match &outcome {
                    Ok(()) => {
                        self.inner.saver.release(entity).await;
                    }
                    Err(err) if err.is_skip() => {}
                    Err(err) => warn!("Final save of departing {} failed: {}", entity, err),
                }
                self.inner.cache.remove(entity);
                info!("{} departed", entity);
                outcome
            })
            .await
    }

    /// Start the periodic autosave loop. Returns `false` if it already runs.
    pub fn start_autosave(&self) -> bool {
        let mut handle = self.autosave_handle();
        if handle.is_some() {
            return false;
        }
        *handle = Some(Arc::clone(&self.inner.autosave).spawn());
        true
    }

    /// Run one autosave sweep now.
    pub async fn autosave_now(&self) -> SweepReport {
        self.inner.autosave.sweep().await
    }

    /// Stop autosave and flush every cached entity under the shutdown deadline.
    pub async fn shutdown(&self) -> FlushReport {
        let running = self.autosave_handle().take();
        if let Some(handle) = running {
            handle.stop().await;
        }
        self.inner.shutdown.flush().await
    }

    fn autosave_handle(&self) -> MutexGuard<'_, Option<AutosaveHandle>> {
        self.inner
            .autosave_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
