//! Consistency service.
//!
//! Runs the inconsistency detector, heals what it finds, and exposes the
//! operation journal for history and rollback.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use warden_core::{ReconciliationConfig, ReconciliationConfigUpdate, Result};
use warden_events::{EventSink, FleetEvent};

use crate::detector::InconsistencyDetector;
use crate::error::RollbackError;
use crate::healer::SelfHealer;
use crate::journal::{
    NewOperation, OperationId, OperationJournal, OperationRecord, RollbackReceipt,
};
use crate::model::{HealingResult, Inconsistency};
use crate::ports::Collaborators;
use crate::stats::ConsistencyStatistics;

/// Detected inconsistencies retained for history and statistics.
pub const INCONSISTENCY_HISTORY_CAP: usize = 100;

/// Summary of one consistency cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyCycleReport {
    pub detected: usize,
    pub healed: usize,
    pub heal_failed: usize,
    pub by_type: BTreeMap<String, usize>,
}

/// Detects and repairs divergence between device records and the runtime.
pub struct ConsistencyService {
    config: RwLock<ReconciliationConfig>,
    detector: InconsistencyDetector,
    healer: SelfHealer,
    journal: Arc<OperationJournal>,
    events: Arc<dyn EventSink>,
    history: RwLock<VecDeque<Inconsistency>>,
}

impl ConsistencyService {
    /// Create the service and apply the journal settings from `config`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration is invalid.
    pub async fn new(
        collaborators: &Collaborators,
        config: ReconciliationConfig,
        journal: Arc<OperationJournal>,
    ) -> Result<Self> {
        config.validate()?;
        journal
            .configure(config.record_operations, config.max_operation_history)
            .await;

        Ok(Self {
            detector: InconsistencyDetector::new(
                collaborators.repository.clone(),
                collaborators.runtime.clone(),
            ),
            healer: SelfHealer::new(
                collaborators.repository.clone(),
                collaborators.runtime.clone(),
                journal.clone(),
            ),
            journal,
            events: collaborators.events.clone(),
            config: RwLock::new(config),
            history: RwLock::new(VecDeque::new()),
        })
    }

    /// Run one check. Returns `None` when reconciliation is disabled.
    pub async fn run_cycle(&self) -> Option<ConsistencyCycleReport> {
        let config = self.config.read().await.clone();
        if !config.enabled {
            return None;
        }

        info!("Running consistency check");
        let inconsistencies = self.detect_inconsistencies().await;

        let mut report = ConsistencyCycleReport {
            detected: inconsistencies.len(),
            ..ConsistencyCycleReport::default()
        };
        if inconsistencies.is_empty() {
            return Some(report);
        }

        for inconsistency in &inconsistencies {
            *report
                .by_type
                .entry(inconsistency.kind.as_str().to_string())
                .or_default() += 1;
        }
        warn!(count = report.detected, "Detected inconsistencies");
        self.publish(FleetEvent::inconsistencies_detected(
            report.detected,
            report.by_type.clone(),
        ))
        .await;

        if config.auto_heal_enabled {
            for inconsistency in inconsistencies.iter().filter(|i| i.auto_fixable) {
                if self.heal(inconsistency).await.success {
                    report.healed += 1;
                } else {
                    report.heal_failed += 1;
                }
            }
        }

        info!(
            healed = report.healed,
            failed = report.heal_failed,
            "Consistency check complete"
        );
        Some(report)
    }

    /// Run the detector and retain what it found.
    pub async fn detect_inconsistencies(&self) -> Vec<Inconsistency> {
        let found = self.detector.detect().await;

        let mut history = self.history.write().await;
        history.extend(found.iter().cloned());
        while history.len() > INCONSISTENCY_HISTORY_CAP {
            history.pop_front();
        }

        found
    }

    /// Heal one inconsistency and publish the outcome.
    pub async fn heal(&self, inconsistency: &Inconsistency) -> HealingResult {
        let result = self.healer.heal(inconsistency).await;

        let event = if result.success {
            FleetEvent::self_healing_succeeded(
                inconsistency.kind.as_str(),
                inconsistency.device_id.clone(),
                result.action.clone(),
            )
        } else {
            FleetEvent::self_healing_failed(
                inconsistency.kind.as_str(),
                inconsistency.device_id.clone(),
                result.error.clone().unwrap_or_default(),
            )
        };
        self.publish(event).await;

        result
    }

    /// Retained inconsistencies, oldest first.
    pub async fn inconsistency_history(&self) -> Vec<Inconsistency> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Journal an operation performed outside the engine.
    pub async fn record_operation(&self, operation: NewOperation) -> Option<OperationId> {
        self.journal.record(operation).await
    }

    /// Roll back a journaled operation and publish the outcome.
    ///
    /// # Errors
    ///
    /// Returns the journal's refusal or the transaction failure.
    pub async fn rollback_operation(
        &self,
        operation_id: &OperationId,
    ) -> std::result::Result<RollbackReceipt, RollbackError> {
        let receipt = self.journal.rollback(operation_id).await?;

        info!(operation_id = %operation_id, entity_id = %receipt.entity_id, "Operation rolled back");
        self.publish(FleetEvent::rollback_succeeded(
            receipt.operation_id.to_string(),
            receipt.operation_type.as_str(),
            receipt.entity_id.clone(),
        ))
        .await;

        Ok(receipt)
    }

    /// Journaled operations, optionally for one entity.
    pub async fn operation_history(&self, entity_id: Option<&str>) -> Vec<OperationRecord> {
        self.journal.history(entity_id).await
    }

    pub async fn statistics(&self) -> ConsistencyStatistics {
        let inconsistencies = self.inconsistency_history().await;
        let operations = self.journal.history(None).await;
        ConsistencyStatistics::compute(&inconsistencies, &operations, Utc::now())
    }

    pub async fn config(&self) -> ReconciliationConfig {
        self.config.read().await.clone()
    }

    /// Apply a partial update, including the journal settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the merged configuration is invalid;
    /// the current configuration is then left untouched.
    pub async fn update_config(
        &self,
        update: &ReconciliationConfigUpdate,
    ) -> Result<ReconciliationConfig> {
        let mut config = self.config.write().await;
        let merged = config.merged(update)?;
        self.journal
            .configure(merged.record_operations, merged.max_operation_history)
            .await;
        *config = merged.clone();
        info!("Reconciliation configuration updated");
        Ok(merged)
    }

    async fn publish(&self, event: FleetEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.events.publish(event).await {
            warn!(event_type, error = %e, "Failed to publish event");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::Value;
    use warden_core::{ContainerId, DeviceId, DeviceSnapshot, DeviceStatus};
    use warden_events::EventLog;

    use super::*;
    use crate::journal::{OperationType, DEVICE_ENTITY};
    use crate::memory::{
        InMemoryContainerRuntime, InMemoryDeviceRepository, InMemoryPortAllocator,
        InMemorySnapshotStore,
    };
    use crate::ports::{ContainerInspection, DeviceRepository};

    struct Fixture {
        repository: Arc<InMemoryDeviceRepository>,
        runtime: Arc<InMemoryContainerRuntime>,
        events: Arc<EventLog>,
        service: ConsistencyService,
    }

    async fn fixture(config: ReconciliationConfig) -> Fixture {
        let repository = Arc::new(InMemoryDeviceRepository::new());
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let events = Arc::new(EventLog::new());
        let collaborators = Collaborators {
            repository: repository.clone(),
            runtime: runtime.clone(),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            ports: Arc::new(InMemoryPortAllocator::new(40_000)),
            events: events.clone(),
        };
        let journal = Arc::new(OperationJournal::new(repository.clone()));
        let service = ConsistencyService::new(&collaborators, config, journal)
            .await
            .unwrap();
        Fixture {
            repository,
            runtime,
            events,
            service,
        }
    }

    async fn drifted(f: &Fixture) {
        f.repository
            .insert(
                DeviceSnapshot::new("device-1", "phone-1")
                    .with_status(DeviceStatus::Running)
                    .with_container("c1"),
            )
            .await;
        let mut stopped = ContainerInspection::running("c1");
        stopped.running = false;
        stopped.status = "exited".to_string();
        f.runtime.add(stopped, true).await;
        f.runtime.add(ContainerInspection::running("orphan"), true).await;
    }

    #[tokio::test]
    async fn test_cycle_heals_and_publishes() {
        let f = fixture(ReconciliationConfig::default()).await;
        drifted(&f).await;

        let report = f.service.run_cycle().await.unwrap();

        assert_eq!(report.detected, 2);
        assert_eq!(report.healed, 2);
        assert_eq!(report.by_type["status_mismatch"], 1);
        assert_eq!(report.by_type["orphaned_container"], 1);
        let device = f
            .repository
            .get(&DeviceId::new("device-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(device.status, DeviceStatus::Stopped);
        assert!(!f.runtime.contains(&ContainerId::new("orphan")).await);

        let types = f.events.event_types().await;
        assert_eq!(types[0], "inconsistencies_detected");
        assert_eq!(types.len(), 3);
        assert_eq!(f.service.inconsistency_history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_detect_only_when_auto_heal_disabled() {
        let config = ReconciliationConfig {
            auto_heal_enabled: false,
            ..ReconciliationConfig::default()
        };
        let f = fixture(config).await;
        drifted(&f).await;

        let report = f.service.run_cycle().await.unwrap();

        assert_eq!(report.detected, 2);
        assert_eq!(report.healed, 0);
        assert!(f.runtime.contains(&ContainerId::new("orphan")).await);
    }

    #[tokio::test]
    async fn test_rollback_publishes_event_once() {
        let f = fixture(ReconciliationConfig::default()).await;
        drifted(&f).await;
        f.service.run_cycle().await.unwrap();

        let operation = f.service.operation_history(Some("device-1")).await[0].id;
        f.service.rollback_operation(&operation).await.unwrap();
        let second = f.service.rollback_operation(&operation).await;

        assert!(matches!(second, Err(RollbackError::AlreadyRolledBack { .. })));
        let rollbacks = f
            .events
            .event_types()
            .await
            .into_iter()
            .filter(|t| *t == "rollback_success")
            .count();
        assert_eq!(rollbacks, 1);

        let stats = f.service.statistics().await;
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.rolled_back_operations, 1);
        assert_eq!(stats.recent_inconsistencies, 2);
    }

    #[tokio::test]
    async fn test_update_config_resizes_journal() {
        let f = fixture(ReconciliationConfig::default()).await;
        for i in 0..5 {
            f.service
                .record_operation(
                    NewOperation::new(OperationType::Update, DEVICE_ENTITY, format!("d{i}"), "api")
                        .with_before(Value::Null),
                )
                .await;
        }

        f.service
            .update_config(&ReconciliationConfigUpdate {
                max_operation_history: Some(2),
                ..ReconciliationConfigUpdate::default()
            })
            .await
            .unwrap();

        assert_eq!(f.service.operation_history(None).await.len(), 2);

        f.service
            .update_config(&ReconciliationConfigUpdate {
                record_operations: Some(false),
                ..ReconciliationConfigUpdate::default()
            })
            .await
            .unwrap();
        let id = f
            .service
            .record_operation(NewOperation::new(
                OperationType::Update,
                DEVICE_ENTITY,
                "d9",
                "api",
            ))
            .await;
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cycle_does_nothing() {
        let config = ReconciliationConfig {
            enabled: false,
            ..ReconciliationConfig::default()
        };
        let f = fixture(config).await;

        assert!(f.service.run_cycle().await.is_none());
    }
}
