use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use entity_store_core::EntityId;
use tokio::sync::Mutex;

/// Per-entity async mutual exclusion.
///
/// Load, departure and saves of the same entity inside one process run one at
/// a time, so a process never races its own session lock. Gates are created on
/// demand and dropped once nobody waits on them.
#[derive(Debug, Default)]
pub struct EntityGates {
    gates: DashMap<EntityId, Arc<Mutex<()>>>,
}

impl EntityGates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the gate of `entity`.
    pub async fn run<F, Fut, T>(&self, entity: &EntityId, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let gate = Arc::clone(self.gates.entry(entity.clone()).or_default().value());
        let result = {
            let _held = gate.lock().await;
            f().await
        };
        drop(gate);

        // Only the map itself still references an idle gate
        self.gates
            .remove_if(entity, |_, gate| Arc::strong_count(gate) == 1);
        result
    }

    /// Number of gates currently allocated.
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_same_entity_is_serialised() {
        let gates = Arc::new(EntityGates::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let entity = EntityId::from("1");

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let gates = Arc::clone(&gates);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            let entity = entity.clone();
            tasks.push(tokio::spawn(async move {
                gates
                    .run(&entity, || async {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(gates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_entities_run_concurrently() {
        let gates = Arc::new(EntityGates::new());
        let started = tokio::time::Instant::now();

        let a = {
            let gates = Arc::clone(&gates);
            tokio::spawn(async move {
                gates
                    .run(&EntityId::from("a"), || tokio::time::sleep(Duration::from_secs(5)))
                    .await
            })
        };
        let b = {
            let gates = Arc::clone(&gates);
            tokio::spawn(async move {
                gates
                    .run(&EntityId::from("b"), || tokio::time::sleep(Duration::from_secs(5)))
                    .await
            })
        };
        a.await.unwrap();
        b.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_returns_closure_result() {
        let gates = EntityGates::new();
        let value = gates.run(&EntityId::from("1"), || async { 42 }).await;
        assert_eq!(value, 42);
        assert_eq!(gates.len(), 0);
    }
}
