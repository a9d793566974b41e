use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use entity_store_core::{EntityId, Record};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

type Callback = Box<dyn Fn(&Record) + Send + Sync>;

struct Subscriber {
    id: u64,
    active: AtomicBool,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<EntityId, Vec<Arc<Subscriber>>>>,
}

impl Registry {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<EntityId, Vec<Arc<Subscriber>>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-entity subscription registry for record updates.
///
/// Delivery is an explicit [`dispatch`](Self::dispatch) call made by the cache
/// after each update. The registry lock is never held while callbacks run, so
/// a callback may subscribe, unsubscribe (itself or others) or read the cache.
#[derive(Clone, Default)]
pub struct UpdateNotifier {
    registry: Arc<Registry>,
}

impl fmt::Debug for UpdateNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateNotifier")
            .field("entities", &self.registry.subscribers().len())
            .finish_non_exhaustive()
    }
}

impl UpdateNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for updates of `entity`.
    pub fn subscribe<F>(&self, entity: &EntityId, callback: F) -> Subscription
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        let subscriber = Arc::new(Subscriber {
            id: self.registry.next_id.fetch_add(1, Ordering::Relaxed),
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        });

        self.registry
            .subscribers()
            .entry(entity.clone())
            .or_default()
            .push(Arc::clone(&subscriber));

        Subscription {
            entity: entity.clone(),
            subscriber,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Subscribe through a channel instead of a callback.
    pub fn stream(&self, entity: &EntityId) -> UpdateStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(entity, move |record| {
            // The receiver is gone only once the stream is dropped, which also unsubscribes
            let _ = tx.send(record.clone());
        });
        UpdateStream {
            inner: UnboundedReceiverStream::new(rx),
            subscription,
        }
    }

    /// Deliver `record` to every active subscriber of `entity`, in subscription
    /// order. Returns how many callbacks ran.
    pub fn dispatch(&self, entity: &EntityId, record: &Record) -> usize {
        let subscribers = match self.registry.subscribers().get(entity) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for subscriber in subscribers {
            // Re-checked per callback: an earlier callback may have unsubscribed this one
            if subscriber.active.load(Ordering::Acquire) {
                (subscriber.callback)(record);
                delivered += 1;
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, entity: &EntityId) -> usize {
        self.registry
            .subscribers()
            .get(entity)
            .map_or(0, |list| list.len())
    }
}

/// Handle to a registered update callback.
///
/// Dropping the handle does not unsubscribe; call [`unsubscribe`](Self::unsubscribe).
pub struct Subscription {
    entity: EntityId,
    subscriber: Arc<Subscriber>,
    registry: Weak<Registry>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("entity", &self.entity)
            .field("id", &self.subscriber.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    pub fn is_active(&self) -> bool {
        self.subscriber.active.load(Ordering::Acquire)
    }

    /// Stop future deliveries. Idempotent and safe to call from inside a callback.
    pub fn unsubscribe(&self) {
        if !self.subscriber.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut subscribers = registry.subscribers();
        if let Some(list) = subscribers.get_mut(&self.entity) {
            list.retain(|s| s.id != self.subscriber.id);
            if list.is_empty() {
                subscribers.remove(&self.entity);
            }
        }
    }
}

/// Stream of an entity's records, one item per update. Unsubscribes on drop.
#[derive(Debug)]
pub struct UpdateStream {
    inner: UnboundedReceiverStream<Record>,
    subscription: Subscription,
}

impl UpdateStream {
    pub fn entity(&self) -> &EntityId {
        self.subscription.entity()
    }
}

impl Stream for UpdateStream {
    type Item = Record;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Record>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for UpdateStream {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio_stream::StreamExt;

    fn counter(notifier: &UpdateNotifier, entity: &EntityId) -> (Subscription, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let subscription = notifier.subscribe(entity, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (subscription, count)
    }

    #[test]
    fn test_dispatch_is_filtered_by_entity() {
        let notifier = UpdateNotifier::new();
        let alice = EntityId::from("alice");
        let bob = EntityId::from("bob");
        let (_a, alice_count) = counter(&notifier, &alice);
        let (_b, bob_count) = counter(&notifier, &bob);

        assert_eq!(notifier.dispatch(&alice, &Record::new()), 1);
        assert_eq!(alice_count.load(Ordering::SeqCst), 1);
        assert_eq!(bob_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let notifier = UpdateNotifier::new();
        let entity = EntityId::from("1");
        let (subscription, count) = counter(&notifier, &entity);

        notifier.dispatch(&entity, &Record::new());
        subscription.unsubscribe();
        subscription.unsubscribe();
        notifier.dispatch(&entity, &Record::new());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!subscription.is_active());
        assert_eq!(notifier.subscriber_count(&entity), 0);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let notifier = UpdateNotifier::new();
        let entity = EntityId::from("1");
        let count = Arc::new(AtomicUsize::new(0));

        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner_slot = Arc::clone(&slot);
        let seen = Arc::clone(&count);
        let subscription = notifier.subscribe(&entity, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            if let Some(own) = inner_slot.lock().unwrap().as_ref() {
                own.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(subscription);

        notifier.dispatch(&entity, &Record::new());
        notifier.dispatch(&entity, &Record::new());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_unsubscribe_a_later_subscriber() {
        let notifier = UpdateNotifier::new();
        let entity = EntityId::from("1");

        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner_slot = Arc::clone(&victim_slot);
        let _first = notifier.subscribe(&entity, move |_| {
            if let Some(victim) = inner_slot.lock().unwrap().as_ref() {
                victim.unsubscribe();
            }
        });
        let (victim, victim_count) = counter(&notifier, &entity);
        *victim_slot.lock().unwrap() = Some(victim);

        assert_eq!(notifier.dispatch(&entity, &Record::new()), 1);
        assert_eq!(victim_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_receives_updates_in_order() {
        let notifier = UpdateNotifier::new();
        let entity = EntityId::from("1");
        let mut updates = notifier.stream(&entity);

        for score in 1..=3 {
            notifier.dispatch(&entity, &Record::new().with("score", score));
        }

        for score in 1..=3 {
            let record = updates.next().await.unwrap();
            assert_eq!(record, Record::new().with("score", score));
        }
    }

    #[test]
    fn test_dropping_stream_unsubscribes() {
        let notifier = UpdateNotifier::new();
        let entity = EntityId::from("1");

        let updates = notifier.stream(&entity);
        assert_eq!(updates.entity(), &entity);
        assert_eq!(notifier.subscriber_count(&entity), 1);

        drop(updates);
        assert_eq!(notifier.subscriber_count(&entity), 0);
        assert_eq!(notifier.dispatch(&entity, &Record::new()), 0);
    }
}
