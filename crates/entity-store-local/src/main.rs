mod config;
mod store;

use std::sync::Arc;

use clap::Parser;
use entity_store::{run_console, termination_signal, EntityStore, LoggingHost, RemoteStore};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use store::FileStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    let template = config.template()?;

    let file_store = FileStore::new(config.effective_local_storage_dir());
    info!("Starting entity-store-local");
    info!("  Storage dir: {}", file_store.base_dir().display());
    info!("  Autosave interval: {}s", config.session.autosave_interval_secs);
    info!(
        "  Retry: {} attempts, {}s apart",
        config.session.retry_attempts, config.session.retry_delay_secs
    );

    let remote: Arc<dyn RemoteStore> = Arc::new(file_store);
    let store = EntityStore::new(remote, Arc::new(LoggingHost), config.session.clone())?;
    store.start_autosave();

    let shutdown_rx = termination_signal();
    let mut stdout = tokio::io::stdout();
    run_console(
        &store,
        &template,
        BufReader::new(tokio::io::stdin()),
        &mut stdout,
        shutdown_rx,
    )
    .await?;

    let report = store.shutdown().await;
    if !report.is_complete() {
        warn!(
            "{} entities may have lost their latest changes",
            report.failed + report.unfinished
        );
    }
    info!("Server shutdown complete");

    // A pending stdin read would otherwise hold the runtime open
    std::process::exit(if report.is_complete() { 0 } else { 1 });
}
