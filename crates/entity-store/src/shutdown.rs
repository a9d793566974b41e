use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::cache::EntityCache;
use crate::error::SaveError;
use crate::gate::EntityGates;
use crate::saver::EntitySaver;

/// Outcome of the shutdown flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Saves still running when the deadline hit
    pub unfinished: usize,
}

impl FlushReport {
    /// Whether every cached entity was either saved or had nothing to save.
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.unfinished == 0
    }
}

/// Final flush of every cached entity on orderly termination.
pub struct ShutdownCoordinator {
    saver: Arc<EntitySaver>,
    cache: Arc<EntityCache>,
    gates: Arc<EntityGates>,
    deadline: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        saver: Arc<EntitySaver>,
        cache: Arc<EntityCache>,
        gates: Arc<EntityGates>,
        deadline: Duration,
    ) -> Self {
        Self {
            saver,
            cache,
            gates,
            deadline,
        }
    }

    /// Save every cached entity concurrently, release its lock and evict it.
    ///
    /// Entities whose save failed stay cached with their lock refreshed. Waits at most the configured deadline; saves still running then are
    /// abandoned and counted as unfinished.
    pub async fn flush(&self) -> FlushReport {
        let entities = self.cache.entities();
        info!(
            "Flushing {} entities (deadline {}s)",
            entities.len(),
            self.deadline.as_secs()
        );

        let mut tasks = JoinSet::new();
        for entity in entities {
            let saver = Arc::clone(&self.saver);
            let cache = Arc::clone(&self.cache);
            let gates = Arc::clone(&self.gates);
            tasks.spawn(async move {
                let outcome = gates
                    .run(&entity, || async {
                        saver.save(&entity).await?;
                        saver.release(&entity).await;
                        // A released entity must not be re-stamped by a later sweep
                        cache.remove(&entity);
                        Ok::<(), SaveError>(())
                    })
                    .await;
                (entity, outcome)
            });
        }

        let mut report = FlushReport {
            unfinished: tasks.len(),
            ..FlushReport::default()
        };

        let drained = timeout(self.deadline, async {
            while let Some(joined) = tasks.join_next().await {
                report.unfinished -= 1;
                match joined {
                    Ok((_, Ok(()))) => report.saved += 1,
                    Ok((entity, Err(err))) if err.is_skip() => {
                        debug!("Flush skipped {}: {}", entity, err);
                        report.skipped += 1;
                    }
                    Ok((entity, Err(err))) => {
                        warn!("Final save of {} failed: {}", entity, err);
                        report.failed += 1;
                    }
                    Err(err) => {
                        error!("Flush task ended abnormally: {}", err);
                        report.failed += 1;
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Shutdown deadline reached with {} saves still running",
                report.unfinished
            );
            tasks.abort_all();
        }

        info!(
            "Flush finished: {} saved, {} failed, {} skipped, {} unfinished",
            report.saved, report.failed, report.skipped, report.unfinished
        );
        report
    }
}

/// Receiver that flips to `true` on Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
pub fn termination_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, initiating shutdown"),
                Err(err) => {
                    error!("Failed to install Ctrl+C handler: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating shutdown");
                }
                Err(err) => {
                    error!("Failed to install SIGTERM handler: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}
