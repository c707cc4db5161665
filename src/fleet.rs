//! A simulated fleet wired to the in-memory collaborators.
//!
//! Devices are seeded in a repeating pattern of healthy and broken states so
//! every detection path has something to find.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;
use warden_core::{DeviceSnapshot, DeviceStatus, WardenConfig};
use warden_events::{EventLog, TracedSink};
use warden_reconciler::memory::{
    InMemoryContainerRuntime, InMemoryDeviceRepository, InMemoryLock, InMemoryPortAllocator,
    InMemorySnapshotStore,
};
use warden_reconciler::ports::HealthStatus;
use warden_reconciler::{
    Collaborators, ConsistencyCycleReport, ConsistencyService, ConsistencyStatistics,
    ContainerInspection, CycleOutcome, FailoverCycleReport, FailoverService, FailoverStatistics,
    OperationJournal, ReconciliationScheduler,
};

const FIRST_ADB_PORT: u16 = 40_000;

/// One pass of both cycles.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub consistency: Option<ConsistencyCycleReport>,
    pub failover: Option<FailoverCycleReport>,
}

/// What a simulation did to the fleet.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub cycles: Vec<CycleSummary>,
    pub device_statuses: BTreeMap<String, usize>,
    pub failover: FailoverStatistics,
    pub consistency: ConsistencyStatistics,
    pub events_published: usize,
}

pub struct SimulatedFleet {
    repository: Arc<InMemoryDeviceRepository>,
    runtime: Arc<InMemoryContainerRuntime>,
    snapshots: Arc<InMemorySnapshotStore>,
    events: Arc<EventLog>,
    failover: Arc<FailoverService>,
    consistency: Arc<ConsistencyService>,
    scheduler: Arc<ReconciliationScheduler>,
}

impl SimulatedFleet {
    /// Wire both services and the scheduler over fresh in-memory state.
    pub async fn new(config: &WardenConfig) -> Result<Self> {
        let repository = Arc::new(InMemoryDeviceRepository::new());
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let events = Arc::new(EventLog::new());

        let collaborators = Collaborators {
            repository: repository.clone(),
            runtime: runtime.clone(),
            snapshots: snapshots.clone(),
            ports: Arc::new(InMemoryPortAllocator::new(FIRST_ADB_PORT)),
            events: Arc::new(TracedSink::new(events.clone())),
        };
        let journal = Arc::new(OperationJournal::new(repository.clone()));

        let failover = FailoverService::builder(collaborators.clone())
            .with_config(config.failover.clone())
            .with_journal(journal.clone())
            .build()
            .context("Invalid failover configuration")?;
        let consistency =
            ConsistencyService::new(&collaborators, config.reconciliation.clone(), journal)
                .await
                .context("Invalid reconciliation configuration")?;

        let failover = Arc::new(failover);
        let consistency = Arc::new(consistency);
        let scheduler = Arc::new(ReconciliationScheduler::new(
            failover.clone(),
            consistency.clone(),
            Arc::new(InMemoryLock::new()),
            config.scheduler.clone(),
        ));

        Ok(Self {
            repository,
            runtime,
            snapshots,
            events,
            failover,
            consistency,
            scheduler,
        })
    }

    /// Add `count` devices plus one orphaned container.
    pub async fn seed(&self, count: usize) {
        let now = Utc::now();
        for n in 0..count {
            let id = format!("device-{n}");
            let container = format!("container-{id}");
            let device = DeviceSnapshot::new(id.as_str(), format!("phone-{n}"))
                .with_status(DeviceStatus::Running)
                .with_container(container.as_str())
                .with_user("user-1")
                .with_heartbeat(now);

            match n % 5 {
                1 => {
                    let mut sick = ContainerInspection::running(container.as_str());
                    sick.health = Some(HealthStatus::Unhealthy);
                    self.runtime.add(sick, true).await;
                }
                2 => {
                    let mut dead = ContainerInspection::running(container.as_str());
                    dead.running = false;
                    dead.status = "exited".to_string();
                    dead.exit_code = Some(137);
                    self.runtime.add(dead, true).await;
                }
                // No container at all.
                3 => {}
                4 => {
                    self.runtime
                        .add(ContainerInspection::running(container.as_str()), true)
                        .await;
                    self.snapshots
                        .add_ready(format!("snapshot-{id}"), device.clone())
                        .await;
                    let stale = device.with_heartbeat(now - Duration::hours(1));
                    self.repository.insert(stale).await;
                    continue;
                }
                _ => {
                    self.runtime
                        .add(ContainerInspection::running(container.as_str()), true)
                        .await;
                }
            }
            self.repository.insert(device).await;
        }

        self.runtime
            .add(ContainerInspection::running("orphan-0"), true)
            .await;
        info!(devices = count, "Seeded simulated fleet");
    }

    /// Run `cycles` consistency-then-failover passes through the scheduler.
    pub async fn simulate(&self, cycles: usize) -> SimulationSummary {
        let mut summaries = Vec::with_capacity(cycles);
        for _ in 0..cycles {
            let consistency = completed(self.scheduler.run_consistency_cycle_once().await);
            let failover = completed(self.scheduler.run_failover_cycle_once().await);
            summaries.push(CycleSummary {
                consistency,
                failover,
            });
        }
        self.summary(summaries).await
    }

    /// Summarise the fleet after `cycles` ran.
    pub async fn summary(&self, cycles: Vec<CycleSummary>) -> SimulationSummary {
        let mut device_statuses = BTreeMap::new();
        for device in self.repository.all().await {
            *device_statuses
                .entry(device.status.as_str().to_string())
                .or_default() += 1;
        }

        SimulationSummary {
            cycles,
            device_statuses,
            failover: self.failover.statistics().await,
            consistency: self.consistency.statistics().await,
            events_published: self.events.len().await,
        }
    }

    pub fn scheduler(&self) -> Arc<ReconciliationScheduler> {
        Arc::clone(&self.scheduler)
    }
}

fn completed<R>(outcome: CycleOutcome<R>) -> Option<R> {
    match outcome {
        CycleOutcome::Completed(report) => Some(report),
        CycleOutcome::Disabled | CycleOutcome::LockNotAcquired => None,
    }
}
