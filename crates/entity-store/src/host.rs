use entity_store_core::EntityId;
use tracing::warn;

/// The application side of the layer: whatever owns the entity's session.
///
/// When an entity's record cannot be made available the layer asks the host to
/// end that entity's session with a human-readable reason.
pub trait EntityHost: Send + Sync {
    fn evict(&self, entity: &EntityId, reason: &str);
}

/// Host that only records evictions in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHost;

impl EntityHost for LoggingHost {
    fn evict(&self, entity: &EntityId, reason: &str) {
        warn!("Evicting {}: {}", entity, reason);
    }
}
