use std::time::Duration;

use clap::Parser;
use entity_store::SessionConfig;
use entity_store_core::{Record, StoreError};

/// Configuration for the entity-store-cloudflare host.
#[derive(Parser, Debug, Clone)]
#[command(name = "entity-store-cloudflare")]
#[command(about = "Session-locked entity store over Cloudflare KV")]
pub struct Config {
    /// Cloudflare account ID
    #[arg(long, env = "CLOUDFLARE_ACCOUNT_ID")]
    pub cloudflare_account_id: String,

    /// Cloudflare API token (needs KV read/write permission)
    #[arg(long, env = "CLOUDFLARE_API_TOKEN")]
    pub cloudflare_api_token: String,

    /// KV namespace ID holding records and session locks
    #[arg(long, env = "KV_NAMESPACE_ID")]
    pub kv_namespace_id: String,

    /// Override of the KV values endpoint (e.g. a local emulator)
    #[arg(long, env = "KV_BASE_URL")]
    pub kv_base_url: Option<String>,

    /// Per-request timeout for KV calls (seconds)
    #[arg(long = "kv-request-timeout", default_value = "10", env = "KV_REQUEST_TIMEOUT")]
    pub kv_request_timeout_secs: u64,

    /// JSON object used as the record of first-time entities
    #[arg(long, default_value = "{}", env = "ENTITY_TEMPLATE")]
    pub entity_template: String,

    #[command(flatten)]
    pub session: SessionConfig,
}

impl Config {
    pub fn kv_request_timeout(&self) -> Duration {
        Duration::from_secs(self.kv_request_timeout_secs)
    }

    pub fn template(&self) -> Result<Record, StoreError> {
        self.entity_template.parse()
    }
}
