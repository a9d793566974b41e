use std::path::PathBuf;

use clap::Parser;
use entity_store::SessionConfig;
use entity_store_core::{Record, StoreError};

/// Configuration for the entity-store-local host.
#[derive(Parser, Debug, Clone)]
#[command(name = "entity-store-local")]
#[command(about = "Session-locked entity store over a local directory")]
pub struct Config {
    /// Base directory for records and session locks
    #[arg(long, env = "LOCAL_STORAGE_DIR")]
    pub local_storage_dir: Option<PathBuf>,

    /// JSON object used as the record of first-time entities
    #[arg(long, default_value = "{}", env = "ENTITY_TEMPLATE")]
    pub entity_template: String,

    #[command(flatten)]
    pub session: SessionConfig,
}

impl Config {
    /// Get the effective local storage directory.
    pub fn effective_local_storage_dir(&self) -> PathBuf {
        self.local_storage_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("entity-store")
                .join("records")
        })
    }

    pub fn template(&self) -> Result<Record, StoreError> {
        self.entity_template.parse()
    }
}
