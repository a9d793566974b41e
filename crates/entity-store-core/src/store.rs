use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

/// Remote key-value store holding entity records and session locks.
///
/// Values are opaque JSON documents. Implementations are expected to be
/// last-write-wins and may fail transiently on any call; callers never talk to a
/// store directly but go through the retry layer.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns the backend identifier (e.g., "memory", "file", "cloudflare-kv").
    fn backend_name(&self) -> &'static str;

    /// Read the value stored under `key`, or `None` if it was never written.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Overwrite the value stored under `key`.
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;
}
