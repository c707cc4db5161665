//! Periodic reconciliation.
//!
//! Two loops share one scheduler: failover every detection interval and the
//! consistency check every check interval. Each tick first takes the
//! cluster-wide lock for its cycle so only one replica runs it. Intervals are
//! re-read after every tick, so a config update applies from the next one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use warden_core::SchedulerConfig;

use crate::consistency::{ConsistencyCycleReport, ConsistencyService};
use crate::failover::{FailoverCycleReport, FailoverService};
use crate::ports::DistributedLock;

/// What one scheduled tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome<R> {
    /// The cycle ran under the lock.
    Completed(R),
    /// The service is disabled by configuration.
    Disabled,
    /// Another replica holds the lock, or the lock service failed.
    LockNotAcquired,
}

impl<R> CycleOutcome<R> {
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Drives both services on their intervals.
pub struct ReconciliationScheduler {
    failover: Arc<FailoverService>,
    consistency: Arc<ConsistencyService>,
    lock: Arc<dyn DistributedLock>,
    config: SchedulerConfig,
}

impl ReconciliationScheduler {
    pub fn new(
        failover: Arc<FailoverService>,
        consistency: Arc<ConsistencyService>,
        lock: Arc<dyn DistributedLock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            failover,
            consistency,
            lock,
            config,
        }
    }

    /// Run one failover cycle under the failover lock.
    pub async fn run_failover_cycle_once(&self) -> CycleOutcome<FailoverCycleReport> {
        self.locked(&self.config.failover_lock_key, || self.failover.run_cycle())
            .await
    }

    /// Run one consistency cycle under the consistency lock.
    pub async fn run_consistency_cycle_once(&self) -> CycleOutcome<ConsistencyCycleReport> {
        self.locked(&self.config.consistency_lock_key, || {
            self.consistency.run_cycle()
        })
        .await
    }

    async fn locked<R, F, Fut>(&self, key: &str, cycle: F) -> CycleOutcome<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<R>>,
    {
        match self.lock.acquire(key, self.config.lock_ttl()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(lock = key, "Lock held elsewhere, skipping cycle");
                return CycleOutcome::LockNotAcquired;
            }
            Err(e) => {
                warn!(lock = key, error = %e, "Failed to acquire lock, skipping cycle");
                return CycleOutcome::LockNotAcquired;
            }
        }

        let report = cycle().await;

        if let Err(e) = self.lock.release(key).await {
            warn!(lock = key, error = %e, "Failed to release lock; it expires with its TTL");
        }

        report.map_or(CycleOutcome::Disabled, CycleOutcome::Completed)
    }

    /// Spawn both loops. They run until [`SchedulerHandle::stop`].
    pub async fn start(self: Arc<Self>) -> SchedulerHandle {
        let failover_every = self.failover.config().await.detection_interval();
        let consistency_every = self.consistency.config().await.check_interval();
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(
            failover_interval_secs = failover_every.as_secs(),
            consistency_interval_secs = consistency_every.as_secs(),
            "Starting reconciliation scheduler"
        );

        let failover = {
            let scheduler = Arc::clone(&self);
            spawn_loop("failover", failover_every, stop_rx.clone(), move || {
                let scheduler = Arc::clone(&scheduler);
                async move {
                    scheduler.run_failover_cycle_once().await;
                    scheduler.failover.config().await.detection_interval()
                }
            })
        };
        let consistency = {
            let scheduler = Arc::clone(&self);
            spawn_loop("consistency", consistency_every, stop_rx, move || {
                let scheduler = Arc::clone(&scheduler);
                async move {
                    scheduler.run_consistency_cycle_once().await;
                    scheduler.consistency.config().await.check_interval()
                }
            })
        };

        SchedulerHandle {
            stop_tx,
            tasks: vec![failover, consistency],
        }
    }
}

/// Run `tick` every `period` until stopped. Each tick returns the period to
/// use from then on.
fn spawn_loop<F, Fut>(
    name: &'static str,
    mut period: Duration,
    mut stop_rx: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Duration> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval_from(Instant::now(), period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let next = tick().await;
                    if next != period {
                        info!(
                            cycle = name,
                            interval_secs = next.as_secs(),
                            "Reconciliation interval changed"
                        );
                        period = next;
                        ticker = interval_from(Instant::now() + period, period);
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        info!(cycle = name, "Reconciliation loop stopped");
                        break;
                    }
                }
            }
        }
    })
}

fn interval_from(start: Instant, period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Handle to the running loops.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal both loops to stop after their current tick.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Wait for both loops to finish.
    pub async fn join(self) {
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Reconciliation loop task failed");
            }
        }
    }
}
