use std::time::Duration;

use async_trait::async_trait;
use entity_store_core::{RemoteStore, StoreError};
use reqwest::Client as HttpClient;
use serde_json::Value;
use tracing::{debug, instrument};

/// Remote store over the Cloudflare KV REST API (v4).
///
/// Each key holds the JSON text of its value. Records live under
/// `user_{id}` and session locks under `sessionlock_{id}` in one namespace.
pub struct KvStore {
    http_client: HttpClient,
    base_url: String,
    api_token: String,
}

impl KvStore {
    /// Create a store for a KV namespace of a Cloudflare account.
    pub fn new(
        account_id: &str,
        namespace_id: &str,
        api_token: String,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base_url = format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/storage/kv/namespaces/{}",
            account_id, namespace_id
        );
        Self::with_base_url(base_url, api_token, request_timeout)
    }

    /// Create a store against any endpoint speaking the KV values API.
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_token: String,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http_client = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn value_url(&self, key: &str) -> String {
        format!("{}/values/{}", self.base_url, urlencoding::encode(key))
    }
}

fn request_error(operation: &str, key: &str, e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout(format!("KV {} {} timed out", operation, key))
    } else if e.is_connect() {
        StoreError::Unavailable(format!("KV {} {} could not connect: {}", operation, key, e))
    } else {
        StoreError::Io(format!("KV {} request failed: {}", operation, e))
    }
}

#[async_trait]
impl RemoteStore for KvStore {
    fn backend_name(&self) -> &'static str {
        "cloudflare-kv"
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let response = self
            .http_client
            .get(self.value_url(key))
            .header("Authorization", format!("Bearer {}", self.api_token))
            .send()
            .await
            .map_err(|e| request_error("GET", key, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!("KV key not found: {}", key);
            return Ok(None);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Io(format!(
                "KV GET failed with status {}: {}",
                status, text
            )));
        }

        // KV GET returns the raw stored text
        let text = response
            .text()
            .await
            .map_err(|e| request_error("GET", key, e))?;

        let value = serde_json::from_str(&text).map_err(|e| {
            StoreError::Serialization(format!("KV value of {} is not JSON: {}", key, e))
        })?;

        debug!("KV GET {} ({} bytes)", key, text.len());
        Ok(Some(value))
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(value).map_err(|e| {
            StoreError::Serialization(format!("Failed to serialize {}: {}", key, e))
        })?;
        let len = body.len();

        let response = self
            .http_client
            .put(self.value_url(key))
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Content-Type", "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|e| request_error("PUT", key, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Io(format!(
                "KV PUT failed with status {}: {}",
                status, text
            )));
        }

        debug!("KV PUT {} ({} bytes)", key, len);
        Ok(())
    }
}
