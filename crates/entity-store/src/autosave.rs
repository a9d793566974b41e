use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::EntityCache;
use crate::gate::EntityGates;
use crate::saver::EntitySaver;

/// Outcome of one autosave sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub saved: usize,
    pub failed: usize,
    /// Entities that left the cache before their turn came
    pub skipped: usize,
}

/// Periodically persists every locked entity and refreshes its session lock.
///
/// The sweep doubles as the lock heartbeat: an owner that stops sweeping lets
/// its locks go stale after one interval.
pub struct AutosaveScheduler {
    saver: Arc<EntitySaver>,
    cache: Arc<EntityCache>,
    gates: Arc<EntityGates>,
    interval: Duration,
}

impl AutosaveScheduler {
    pub fn new(
        saver: Arc<EntitySaver>,
        cache: Arc<EntityCache>,
        gates: Arc<EntityGates>,
        interval: Duration,
    ) -> Self {
        Self {
            saver,
            cache,
            gates,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Save every locked entity once, concurrently. Failures are isolated.
    pub async fn sweep(&self) -> SweepReport {
        let entities = self.cache.locked_entities();
        let outcomes = join_all(
            entities
                .iter()
                .map(|entity| self.gates.run(entity, || self.saver.save(entity))),
        )
        .await;

        let mut report = SweepReport::default();
        for (entity, outcome) in entities.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.saved += 1,
                Err(err) if err.is_skip() => {
                    debug!("Autosave skipped {}: {}", entity, err);
                    report.skipped += 1;
                }
                Err(err) => {
                    warn!("Autosave of {} failed: {}", entity, err);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Run sweeps at a fixed rate on a background task until stopped.
    ///
    /// Sweep duration does not stretch the period. Ticks missed by a sweep that
    /// overruns the interval are skipped rather than run back to back.
    pub fn spawn(self: Arc<Self>) -> AutosaveHandle {
        let (stop, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!("Autosave running every {}s", self.interval.as_secs());
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    // Also fires if the handle was dropped
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let report = self.sweep().await;
                        if report.failed > 0 {
                            warn!(
                                "Autosave sweep: {} saved, {} failed, {} skipped",
                                report.saved, report.failed, report.skipped
                            );
                        } else {
                            debug!(
                                "Autosave sweep: {} saved, {} skipped",
                                report.saved, report.skipped
                            );
                        }
                    }
                }
            }
            info!("Autosave stopped");
        });

        AutosaveHandle { stop, task }
    }
}

/// Stop handle of a running autosave loop.
pub struct AutosaveHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AutosaveHandle {
    /// Stop the loop and wait for it. A sweep already in progress completes first.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            error!("Autosave task ended abnormally: {}", err);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
