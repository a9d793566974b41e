//! Session-locked entity records over an unreliable remote key-value store.
//!
//! Several processes may serve the same entity population from one shared
//! store. Each entity's record is cached by at most one process at a time, which
//! is enforced by a timestamp session lock kept fresh by the autosave loop.
//!
//! The building blocks, bottom-up:
//! - [`RetryExecutor`]: bounded attempts with a fixed delay for every remote call
//! - [`SessionLockManager`]: check, claim, refresh and release of session locks
//! - [`EntityCache`] / [`UpdateNotifier`]: in-memory records and update delivery
//! - [`DataLoader`]: lock then read, install only on full success
//! - [`EntitySaver`], [`AutosaveScheduler`], [`ShutdownCoordinator`]: persistence
//! - [`EntityStore`]: the service object tying it together

pub mod autosave;
pub mod cache;
pub mod config;
pub mod console;
pub mod error;
pub mod gate;
pub mod host;
pub mod loader;
pub mod lock;
pub mod notify;
pub mod retry;
pub mod saver;
pub mod service;
pub mod shutdown;

pub use autosave::{AutosaveHandle, AutosaveScheduler, SweepReport};
pub use cache::{CacheEntry, EntityCache};
pub use config::{SessionConfig, DEFAULT_KICK_MESSAGE, DEFAULT_LOAD_FAILURE_MESSAGE};
pub use console::{run_console, Command, CommandError};
pub use error::{ConfigError, ExhaustedRetries, LoadError, SaveError};
pub use gate::EntityGates;
pub use host::{EntityHost, LoggingHost};
pub use loader::DataLoader;
pub use lock::{LockDecision, SessionLockManager};
pub use notify::{Subscription, UpdateNotifier, UpdateStream};
pub use retry::RetryExecutor;
pub use saver::EntitySaver;
pub use service::EntityStore;
pub use shutdown::{termination_signal, FlushReport, ShutdownCoordinator};

pub use entity_store_core::{EntityId, Record, RemoteStore, StoreError};
