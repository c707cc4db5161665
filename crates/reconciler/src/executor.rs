//! Recovery execution.
//!
//! The executor never returns an error: each strategy ends in a
//! [`RecoveryResult`] describing what actually ran and how long it took.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};
use warden_core::{
    ContainerId, DeviceSnapshot, DeviceStatus, Error, FailoverConfig, Result,
};

use crate::journal::OperationJournal;
use crate::model::{RecoveryResult, RecoveryStrategy};
use crate::ports::{
    ContainerRuntime, ContainerSpec, PortAllocator, RestoreOptions, SnapshotStore, DEVICE_LABEL,
    MANAGED_LABEL,
};
use crate::retry::{with_retry, RetryPolicy};

const EXECUTED_BY: &str = "failover";

/// What one strategy run produced before timing is attached.
struct StrategyRun {
    strategy: RecoveryStrategy,
    outcome: Result<Option<ContainerId>>,
    attempts: u32,
}

impl StrategyRun {
    fn failed(strategy: RecoveryStrategy, error: Error, attempts: u32) -> Self {
        Self {
            strategy,
            outcome: Err(error),
            attempts,
        }
    }
}

/// Runs restart, restore and recreate against the collaborators.
pub struct RecoveryExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    snapshots: Arc<dyn SnapshotStore>,
    ports: Arc<dyn PortAllocator>,
    journal: Arc<OperationJournal>,
    restart_policy: RetryPolicy,
    create_policy: RetryPolicy,
}

impl RecoveryExecutor {
    /// Create an executor with the default retry policies.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        snapshots: Arc<dyn SnapshotStore>,
        ports: Arc<dyn PortAllocator>,
        journal: Arc<OperationJournal>,
    ) -> Self {
        Self {
            runtime,
            snapshots,
            ports,
            journal,
            restart_policy: RetryPolicy::RESTART,
            create_policy: RetryPolicy::CREATE,
        }
    }

    /// Set the backoff used for container restarts.
    #[must_use]
    pub const fn with_restart_policy(mut self, policy: RetryPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Set the backoff used for container creation.
    #[must_use]
    pub const fn with_create_policy(mut self, policy: RetryPolicy) -> Self {
        self.create_policy = policy;
        self
    }

    /// Execute `selected` for `device`.
    pub async fn execute(
        &self,
        device: &DeviceSnapshot,
        selected: RecoveryStrategy,
        config: &FailoverConfig,
    ) -> RecoveryResult {
        let started = Instant::now();
        info!(device_id = %device.id, strategy = %selected, "Recovering device");

        let run = match selected {
            RecoveryStrategy::RestartContainer => self.restart(device, config).await,
            RecoveryStrategy::RestoreFromSnapshot => self.restore(device, config).await,
            RecoveryStrategy::Recreate => self.recreate(device, config).await,
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let (success, new_container_id, error) = match run.outcome {
            Ok(container_id) => (true, container_id, None),
            Err(e) => {
                warn!(
                    device_id = %device.id,
                    strategy = %run.strategy,
                    error = %e,
                    "Recovery failed"
                );
                (false, None, Some(e.to_string()))
            }
        };

        RecoveryResult {
            success,
            device_id: device.id.clone(),
            selected_strategy: selected,
            strategy: run.strategy,
            new_container_id,
            duration_ms,
            error,
            attempts: run.attempts,
            completed_at: Utc::now(),
        }
    }

    async fn restart(&self, device: &DeviceSnapshot, config: &FailoverConfig) -> StrategyRun {
        let strategy = RecoveryStrategy::RestartContainer;
        let Some(container_id) = device.container_id.clone() else {
            return StrategyRun::failed(
                strategy,
                Error::precondition(format!("device {} has no container", device.id)),
                0,
            );
        };

        let policy = self
            .restart_policy
            .with_max_attempts(config.max_recovery_attempts);
        let retried = with_retry(policy, "restart_container", || {
            self.runtime.restart(&container_id)
        })
        .await;
        if let Err(e) = retried.value {
            return StrategyRun::failed(strategy, e, retried.attempts);
        }

        let updated = device.clone().with_status(DeviceStatus::Running);
        let outcome = self
            .journal
            .journaled_update(device, &updated, EXECUTED_BY, true)
            .await
            .map(|_| None);

        StrategyRun {
            strategy,
            outcome,
            attempts: retried.attempts,
        }
    }

    async fn restore(&self, device: &DeviceSnapshot, config: &FailoverConfig) -> StrategyRun {
        let strategy = RecoveryStrategy::RestoreFromSnapshot;

        let snapshot = match self.snapshots.latest_ready(&device.id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                warn!(device_id = %device.id, "No snapshot available, falling back to recreate");
                return self.recreate(device, config).await;
            }
            Err(e) => return StrategyRun::failed(strategy, e, 1),
        };

        let Some(user_id) = device.user_id.as_deref() else {
            return StrategyRun::failed(
                strategy,
                Error::precondition(format!(
                    "device {} has no owning user for snapshot restoration",
                    device.id
                )),
                0,
            );
        };

        if let Some(old) = &device.container_id {
            self.discard_container(old, true).await;
        }

        let restored = match self
            .snapshots
            .restore(
                &snapshot.id,
                RestoreOptions {
                    replace_original: true,
                },
                user_id,
            )
            .await
        {
            Ok(restored) => restored,
            Err(e) => return StrategyRun::failed(strategy, e, 1),
        };

        let new_container_id = restored.container_id.clone();
        let outcome = self
            .journal
            .journaled_update(device, &restored, EXECUTED_BY, false)
            .await
            .map(|_| new_container_id);

        StrategyRun {
            strategy,
            outcome,
            attempts: 1,
        }
    }

    async fn recreate(&self, device: &DeviceSnapshot, config: &FailoverConfig) -> StrategyRun {
        let strategy = RecoveryStrategy::Recreate;

        if !config.auto_recreate_enabled {
            return StrategyRun::failed(
                strategy,
                Error::precondition("automatic recreation disabled"),
                0,
            );
        }

        if let Some(old) = &device.container_id {
            self.discard_container(old, false).await;
        }

        let ports = match self.ports.allocate().await {
            Ok(ports) => ports,
            Err(e) => {
                self.mark_error(device, &e).await;
                return StrategyRun::failed(strategy, e, 0);
            }
        };

        let spec = ContainerSpec {
            name: format!(
                "{}-recreated-{}",
                device.name,
                Utc::now().timestamp_millis()
            ),
            resources: device.resources.clone(),
            adb_port: ports.adb_port,
            webrtc_port: ports.webrtc_port,
            labels: HashMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (DEVICE_LABEL.to_string(), device.id.to_string()),
            ]),
        };

        let policy = self
            .create_policy
            .with_max_attempts(config.max_recovery_attempts);
        let created = with_retry(policy, "create_container", || self.runtime.create(&spec)).await;
        let container_id = match created.value {
            Ok(container_id) => container_id,
            Err(e) => {
                self.mark_error(device, &e).await;
                return StrategyRun::failed(strategy, e, created.attempts);
            }
        };

        let updated = device
            .clone()
            .with_container(container_id.clone())
            .with_adb_port(ports.adb_port)
            .with_status(DeviceStatus::Running);

        let outcome = self
            .journal
            .journaled_update(device, &updated, EXECUTED_BY, false)
            .await
            .map(|_| Some(container_id));

        StrategyRun {
            strategy,
            outcome,
            attempts: created.attempts,
        }
    }

    /// Best-effort removal of a container that is being replaced.
    async fn discard_container(&self, container_id: &ContainerId, stop_first: bool) {
        if stop_first {
            if let Err(e) = self.runtime.stop(container_id).await {
                warn!(container_id = %container_id, error = %e, "Failed to stop old container");
            }
        }
        if let Err(e) = self.runtime.remove(container_id).await {
            warn!(container_id = %container_id, error = %e, "Failed to remove old container");
        }
    }

    /// Leave a device whose recreation failed in `Error`, not half-updated.
    async fn mark_error(&self, device: &DeviceSnapshot, cause: &Error) {
        let mut failed = device.clone().with_status(DeviceStatus::Error);
        failed.record_error(cause.to_string(), Utc::now());

        if let Err(e) = self
            .journal
            .journaled_update(device, &failed, EXECUTED_BY, false)
            .await
        {
            error!(device_id = %device.id, error = %e, "Failed to mark device as error");
        }
    }
}
