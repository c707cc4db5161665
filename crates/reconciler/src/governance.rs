//! Failure-rate governance.
//!
//! Every automatic recovery passes through [`GovernanceTracker::handle`],
//! which enforces the per-device cooldown and the consecutive-failure
//! ceiling before the executor runs. The bookkeeping lives behind
//! [`GovernanceStore`] so replicas can share it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use warden_core::{
    DeviceId, DeviceSnapshot, DeviceStatus, FailoverConfig, ResultExt, META_PERMANENT_FAILURE,
};
use warden_events::{EventSink, FleetEvent};

use crate::executor::RecoveryExecutor;
use crate::journal::OperationJournal;
use crate::model::{Failure, RecoveryResult, RecoveryStrategy};
use crate::ports::DeviceRepository;
use crate::strategy::select_strategy;

/// Failures retained per device.
pub const FAILURE_HISTORY_CAP: usize = 10;

/// Recovery results retained across the fleet.
pub const MIGRATION_HISTORY_CAP: usize = 100;

const EXECUTED_BY: &str = "governance";

/// Bounded governance bookkeeping.
#[async_trait]
pub trait GovernanceStore: Send + Sync {
    /// Append a failure to the device's history, returning the new length.
    async fn record_failure(&self, failure: Failure) -> usize;

    /// Failure history for one device, or for every device oldest first.
    async fn failure_history(&self, device_id: Option<&DeviceId>) -> Vec<Failure>;

    /// Number of devices with a non-empty failure history.
    async fn devices_with_failures(&self) -> usize;

    /// Forget the device's failures.
    async fn clear_failures(&self, device_id: &DeviceId);

    /// When recovery last ran for the device.
    async fn last_migration_at(&self, device_id: &DeviceId) -> Option<DateTime<Utc>>;

    async fn set_last_migration_at(&self, device_id: &DeviceId, at: DateTime<Utc>);

    /// Append a recovery result to the fleet-wide history.
    async fn append_result(&self, result: RecoveryResult);

    /// Retained recovery results, oldest first.
    async fn migration_history(&self) -> Vec<RecoveryResult>;

    async fn mark_permanent(&self, device_id: &DeviceId);

    async fn clear_permanent(&self, device_id: &DeviceId);

    async fn is_permanent(&self, device_id: &DeviceId) -> bool;
}

#[derive(Default)]
struct GovernanceState {
    failures: HashMap<DeviceId, VecDeque<Failure>>,
    last_migration: HashMap<DeviceId, DateTime<Utc>>,
    migrations: VecDeque<RecoveryResult>,
    permanent: HashSet<DeviceId>,
}

/// Process-local governance store.
#[derive(Default)]
pub struct InMemoryGovernanceStore {
    state: RwLock<GovernanceState>,
}

impl InMemoryGovernanceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GovernanceStore for InMemoryGovernanceStore {
    async fn record_failure(&self, failure: Failure) -> usize {
        let mut state = self.state.write().await;
        let history = state.failures.entry(failure.device_id.clone()).or_default();
        history.push_back(failure);
        while history.len() > FAILURE_HISTORY_CAP {
            history.pop_front();
        }
        history.len()
    }

    async fn failure_history(&self, device_id: Option<&DeviceId>) -> Vec<Failure> {
        let state = self.state.read().await;
        match device_id {
            Some(id) => state
                .failures
                .get(id)
                .map(|history| history.iter().cloned().collect())
                .unwrap_or_default(),
            None => {
                let mut all: Vec<Failure> =
                    state.failures.values().flatten().cloned().collect();
                all.sort_by_key(|failure| failure.timestamp);
                all
            }
        }
    }

    async fn devices_with_failures(&self) -> usize {
        self.state
            .read()
            .await
            .failures
            .values()
            .filter(|history| !history.is_empty())
            .count()
    }

    async fn clear_failures(&self, device_id: &DeviceId) {
        self.state.write().await.failures.remove(device_id);
    }

    async fn last_migration_at(&self, device_id: &DeviceId) -> Option<DateTime<Utc>> {
        self.state.read().await.last_migration.get(device_id).copied()
    }

    async fn set_last_migration_at(&self, device_id: &DeviceId, at: DateTime<Utc>) {
        self.state
            .write()
            .await
            .last_migration
            .insert(device_id.clone(), at);
    }

    async fn append_result(&self, result: RecoveryResult) {
        let mut state = self.state.write().await;
        state.migrations.push_back(result);
        while state.migrations.len() > MIGRATION_HISTORY_CAP {
            state.migrations.pop_front();
        }
    }

    async fn migration_history(&self) -> Vec<RecoveryResult> {
        self.state.read().await.migrations.iter().cloned().collect()
    }

    async fn mark_permanent(&self, device_id: &DeviceId) {
        self.state.write().await.permanent.insert(device_id.clone());
    }

    async fn clear_permanent(&self, device_id: &DeviceId) {
        self.state.write().await.permanent.remove(device_id);
    }

    async fn is_permanent(&self, device_id: &DeviceId) -> bool {
        self.state.read().await.permanent.contains(device_id)
    }
}

/// Why a failure did not lead to a recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Recovery ran recently; the device is left alone until `until`.
    Cooldown { until: DateTime<Utc> },
    /// Automatic recovery was already abandoned for the device.
    PermanentlyFailed,
}

/// What the tracker did with one failure.
#[derive(Debug, Clone, PartialEq)]
pub enum GovernanceOutcome {
    /// Nothing was recorded or changed.
    Skipped(SkipReason),
    /// The ceiling was reached and the device marked permanently failed.
    Abandoned { consecutive_failures: usize },
    /// The executor ran.
    Attempted(RecoveryResult),
}

/// Gatekeeper between detected failures and the executor.
pub struct GovernanceTracker {
    store: Arc<dyn GovernanceStore>,
    repository: Arc<dyn DeviceRepository>,
    executor: Arc<RecoveryExecutor>,
    journal: Arc<OperationJournal>,
    events: Arc<dyn EventSink>,
}

impl GovernanceTracker {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        repository: Arc<dyn DeviceRepository>,
        executor: Arc<RecoveryExecutor>,
        journal: Arc<OperationJournal>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            repository,
            executor,
            journal,
            events,
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn GovernanceStore> {
        &self.store
    }

    /// Gate one failure and, if it passes, recover the device.
    pub async fn handle(&self, failure: Failure, config: &FailoverConfig) -> GovernanceOutcome {
        let device_id = failure.device_id.clone();
        let device = self
            .repository
            .get(&device_id)
            .await
            .into_option_logged()
            .flatten();

        if self.store.is_permanent(&device_id).await
            || device.as_ref().is_some_and(DeviceSnapshot::is_permanently_failed)
        {
            debug!(device_id = %device_id, "Device permanently failed, skipping");
            return GovernanceOutcome::Skipped(SkipReason::PermanentlyFailed);
        }

        let now = Utc::now();
        if let Some(last) = self.store.last_migration_at(&device_id).await {
            let until = last + config.cooldown();
            if now < until {
                debug!(device_id = %device_id, until = %until, "Device in cooldown, skipping");
                return GovernanceOutcome::Skipped(SkipReason::Cooldown { until });
            }
        }

        let failure_type = failure.failure_type;
        let consecutive = self.store.record_failure(failure.clone()).await;
        let ceiling = usize::try_from(config.max_consecutive_failures).unwrap_or(usize::MAX);
        if consecutive >= ceiling {
            self.abandon(&device_id, device.as_ref(), consecutive).await;
            return GovernanceOutcome::Abandoned {
                consecutive_failures: consecutive,
            };
        }

        let result = match device {
            Some(device) => {
                let strategy = select_strategy(&failure, &device, config);
                self.executor.execute(&device, strategy, config).await
            }
            None => RecoveryResult::not_attempted(
                device_id.clone(),
                RecoveryStrategy::Recreate,
                "Device not found",
            ),
        };

        self.settle(&result, failure_type.as_str()).await;
        GovernanceOutcome::Attempted(result)
    }

    /// Record a finished recovery: cooldown, history, reset on success, event.
    pub(crate) async fn settle(&self, result: &RecoveryResult, failure_type: &str) {
        self.store
            .set_last_migration_at(&result.device_id, Utc::now())
            .await;
        self.store.append_result(result.clone()).await;

        let event = if result.success {
            self.store.clear_failures(&result.device_id).await;
            self.store.clear_permanent(&result.device_id).await;
            info!(
                device_id = %result.device_id,
                strategy = %result.strategy,
                duration_ms = result.duration_ms,
                "Device recovered"
            );
            FleetEvent::recovery_succeeded(
                result.device_id.clone(),
                failure_type,
                result.strategy.as_str(),
                result.duration_ms,
            )
        } else {
            FleetEvent::recovery_failed(
                result.device_id.clone(),
                failure_type,
                result.strategy.as_str(),
                result.error.clone(),
                result.attempts,
            )
        };
        self.publish(event).await;
    }

    async fn abandon(
        &self,
        device_id: &DeviceId,
        device: Option<&DeviceSnapshot>,
        consecutive: usize,
    ) {
        error!(
            device_id = %device_id,
            consecutive_failures = consecutive,
            "Device exceeded max consecutive failures, marking as permanently failed"
        );

        self.store.mark_permanent(device_id).await;

        if let Some(device) = device {
            let mut failed = device.clone().with_status(DeviceStatus::Error);
            failed
                .metadata
                .insert(META_PERMANENT_FAILURE.to_string(), Value::Bool(true));
            failed.record_error(
                format!("Exceeded {consecutive} consecutive failures"),
                Utc::now(),
            );
            if let Err(e) = self
                .journal
                .journaled_update(device, &failed, EXECUTED_BY, true)
                .await
            {
                error!(device_id = %device_id, error = %e, "Failed to mark device as permanently failed");
            }
        }

        self.publish(FleetEvent::permanent_failure(device_id.clone(), consecutive))
            .await;
    }

    async fn publish(&self, event: FleetEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.events.publish(event).await {
            warn!(event_type, error = %e, "Failed to publish event");
        }
    }
}
