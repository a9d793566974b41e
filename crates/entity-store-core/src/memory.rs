use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::store::RemoteStore;

/// A remote store operation, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, Value>,
    /// Remaining injected failures per (op, key)
    failures: HashMap<(StoreOp, String), u32>,
    /// Artificial latency per key, applied to every op
    latency: HashMap<String, Duration>,
    calls: HashMap<(StoreOp, String), u32>,
}

/// In-process remote store.
///
/// Clones share the same contents, so two consistency layers built over clones
/// of one `MemoryStore` behave like two processes sharing a remote store.
/// Faults and latency can be injected per key to exercise retry, lock and
/// shutdown paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a value directly, bypassing injected faults and call counters.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.state().values.insert(key.into(), value);
    }

    /// Read a value directly, bypassing injected faults and call counters.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.state().values.get(key).cloned()
    }

    /// All keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state().values.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Make the next `times` calls of `op` on `key` fail.
    pub fn fail_next(&self, op: StoreOp, key: impl Into<String>, times: u32) {
        self.state().failures.insert((op, key.into()), times);
    }

    /// Delay every call touching `key` by `latency`.
    pub fn set_latency(&self, key: impl Into<String>, latency: Duration) {
        self.state().latency.insert(key.into(), latency);
    }

    /// Number of calls of `op` made on `key` through the `RemoteStore` interface.
    pub fn calls(&self, op: StoreOp, key: &str) -> u32 {
        self.state()
            .calls
            .get(&(op, key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    async fn begin(&self, op: StoreOp, key: &str) -> Result<(), StoreError> {
        let (latency, fail) = {
            let mut state = self.state();
            *state.calls.entry((op, key.to_string())).or_default() += 1;
            let fail = match state.failures.get_mut(&(op, key.to_string())) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            (state.latency.get(key).copied(), fail)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if fail {
            return Err(StoreError::Unavailable(format!(
                "injected {:?} failure for {}",
                op, key
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.begin(StoreOp::Get, key).await?;
        Ok(self.state().values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.begin(StoreOp::Set, key).await?;
        self.state().values.insert(key.to_string(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("user_1").await.unwrap(), None);

        store.set("user_1", &json!({"score": 1})).await.unwrap();
        assert_eq!(store.get("user_1").await.unwrap(), Some(json!({"score": 1})));
        assert_eq!(store.calls(StoreOp::Get, "user_1"), 2);
        assert_eq!(store.calls(StoreOp::Set, "user_1"), 1);
    }

    #[tokio::test]
    async fn test_clones_share_contents() {
        let store = MemoryStore::new();
        let other = store.clone();

        store.set("sessionlock_1", &json!(100)).await.unwrap();
        assert_eq!(other.value("sessionlock_1"), Some(json!(100)));
        assert_eq!(other.keys(), vec!["sessionlock_1".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.insert("user_1", json!({"score": 5}));
        store.fail_next(StoreOp::Get, "user_1", 2);

        assert!(store.get("user_1").await.is_err());
        assert!(store.get("user_1").await.is_err());
        assert_eq!(store.get("user_1").await.unwrap(), Some(json!({"score": 5})));

        // Other keys and ops are untouched
        assert!(store.set("user_1", &json!({})).await.is_ok());
        assert!(store.get("user_2").await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_set_does_not_write() {
        let store = MemoryStore::new();
        store.fail_next(StoreOp::Set, "user_1", 1);

        assert!(store.set("user_1", &json!({"score": 1})).await.is_err());
        assert_eq!(store.value("user_1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let store = MemoryStore::new();
        store.set_latency("user_slow", Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        store.set("user_slow", &json!({})).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        store.set("user_fast", &json!({})).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
