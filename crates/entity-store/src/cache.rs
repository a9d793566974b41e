use std::collections::VecDeque;

use dashmap::DashMap;
use entity_store_core::{EntityId, Record};
use tracing::{debug, warn};

use crate::notify::{Subscription, UpdateNotifier, UpdateStream};

/// A loaded entity's record and whether this process holds its session lock.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub record: Record,
    /// `false` is reserved for entries still awaiting lock confirmation; such
    /// entries are never persisted.
    pub locked: bool,
}

impl CacheEntry {
    pub fn locked(record: Record) -> Self {
        Self {
            record,
            locked: true,
        }
    }
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    /// Records produced by `update` and not yet delivered to subscribers
    pending: VecDeque<Record>,
    /// Set while some caller is draining `pending`
    dispatching: bool,
}

/// Hands the queue back if a subscriber panics mid-delivery, so the next
/// update drains it again.
struct DrainGuard<'a> {
    slots: &'a DashMap<EntityId, Slot>,
    entity: &'a EntityId,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            if let Some(mut slot) = self.slots.get_mut(self.entity) {
                slot.dispatching = false;
            }
        }
    }
}

/// In-memory records of every active entity.
///
/// All record mutation goes through [`update`](Self::update), which delivers
/// the new record to the entity's subscribers. Deliveries for one entity are
/// serialised through a per-entity queue: whoever finds the queue idle drains
/// it, so subscribers see records in update order even when a callback issues
/// a nested update.
#[derive(Debug, Default)]
pub struct EntityCache {
    slots: DashMap<EntityId, Slot>,
    notifier: UpdateNotifier,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly loaded entry, replacing any previous one.
    pub fn install(&self, entity: EntityId, entry: CacheEntry) {
        debug!("Caching {} (locked={})", entity, entry.locked);
        self.slots.insert(
            entity,
            Slot {
                entry,
                pending: VecDeque::new(),
                dispatching: false,
            },
        );
    }

    /// The cached record, if the entity is active. Never touches the remote store.
    pub fn get(&self, entity: &EntityId) -> Option<Record> {
        self.slots.get(entity).map(|slot| slot.entry.record.clone())
    }

    pub fn entry(&self, entity: &EntityId) -> Option<CacheEntry> {
        self.slots.get(entity).map(|slot| slot.entry.clone())
    }

    pub fn contains(&self, entity: &EntityId) -> bool {
        self.slots.contains_key(entity)
    }

    /// Replace the entity's record with `transform(current)` and notify its
    /// subscribers with the result.
    ///
    /// Returns the new record, or `None` (with a diagnostic) when the entity is
    /// not loaded. `transform` runs while the entry is locked and must not call
    /// back into the cache.
    pub fn update<F>(&self, entity: &EntityId, transform: F) -> Option<Record>
    where
        F: FnOnce(Record) -> Record,
    {
        let (record, drain) = {
            let Some(mut slot) = self.slots.get_mut(entity) else {
                warn!("Ignoring update for {}: entity is not loaded", entity);
                return None;
            };
            let next = transform(slot.entry.record.clone());
            slot.entry.record = next.clone();
            slot.pending.push_back(next.clone());
            let drain = !slot.dispatching;
            slot.dispatching = true;
            (next, drain)
        };

        if drain {
            self.drain(entity);
        }
        Some(record)
    }

    fn drain(&self, entity: &EntityId) {
        let _guard = DrainGuard {
            slots: &self.slots,
            entity,
        };
        loop {
            let next = match self.slots.get_mut(entity) {
                Some(mut slot) => match slot.pending.pop_front() {
                    Some(record) => record,
                    None => {
                        slot.dispatching = false;
                        return;
                    }
                },
                // Evicted mid-delivery: remaining updates die with the entry
                None => return,
            };
            self.notifier.dispatch(entity, &next);
        }
    }

    /// Evict the entity. Subscriptions survive and resume if it is loaded again.
    pub fn remove(&self, entity: &EntityId) -> Option<CacheEntry> {
        let removed = self.slots.remove(entity).map(|(_, slot)| slot.entry);
        if removed.is_some() {
            debug!("Evicted {} from cache", entity);
        }
        removed
    }

    /// Snapshot of every cached entity id, sorted.
    pub fn entities(&self) -> Vec<EntityId> {
        let mut entities: Vec<EntityId> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        entities.sort();
        entities
    }

    /// Snapshot of the entity ids whose session lock this process holds, sorted.
    pub fn locked_entities(&self) -> Vec<EntityId> {
        let mut entities: Vec<EntityId> = self
            .slots
            .iter()
            .filter(|slot| slot.entry.locked)
            .map(|slot| slot.key().clone())
            .collect();
        entities.sort();
        entities
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn subscribe<F>(&self, entity: &EntityId, callback: F) -> Subscription
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        self.notifier.subscribe(entity, callback)
    }

    pub fn updates(&self, entity: &EntityId) -> UpdateStream {
        self.notifier.stream(entity)
    }

    pub fn notifier(&self) -> &UpdateNotifier {
        &self.notifier
    }
}
