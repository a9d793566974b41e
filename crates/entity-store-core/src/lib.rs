//! Core traits and types for session-locked entity store backends.
//!
//! This crate defines the abstractions shared between the consistency layer and
//! the remote key-value backends:
//! - `RemoteStore`: get/set access to an unreliable key-value store
//! - `Record`: the opaque per-entity document
//! - `EntityId` and the key layout (`user_<id>`, `sessionlock_<id>`)
//! - `Clock`: the time source used to judge session-lock freshness
//! - `MemoryStore`: an in-process store with failure and latency injection

mod clock;
mod error;
mod keys;
mod memory;
mod record;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use keys::{data_key, lock_key, EntityId, DATA_KEY_PREFIX, LOCK_KEY_PREFIX};
pub use memory::{MemoryStore, StoreOp};
pub use record::Record;
pub use store::RemoteStore;
