//! Failover service.
//!
//! Wires the classifier, governance tracker and executor together and exposes
//! the operator surface: configuration, history, statistics and manual
//! recovery.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use warden_core::{
    DeviceId, Error, FailoverConfig, FailoverConfigUpdate, Result, ResultExt, Severity,
    META_PERMANENT_FAILURE,
};

use crate::classifier::FailureClassifier;
use crate::executor::RecoveryExecutor;
use crate::governance::{
    GovernanceOutcome, GovernanceStore, GovernanceTracker, InMemoryGovernanceStore,
};
use crate::journal::OperationJournal;
use crate::model::{Failure, FailureType, RecoveryResult};
use crate::ports::{Collaborators, DeviceRepository};
use crate::records::{failover_records, FailoverRecord, FailoverRecordQuery, Page};
use crate::retry::RetryPolicy;
use crate::stats::FailoverStatistics;
use crate::strategy::select_strategy;

const EXECUTED_BY: &str = "manual-recovery";

/// Summary of one detection-and-recovery cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverCycleReport {
    pub failures_detected: usize,
    pub recovered: usize,
    pub recovery_failed: usize,
    pub skipped: usize,
    pub abandoned: usize,
}

impl FailoverCycleReport {
    fn tally(&mut self, outcome: &GovernanceOutcome) {
        match outcome {
            GovernanceOutcome::Skipped(_) => self.skipped += 1,
            GovernanceOutcome::Abandoned { .. } => self.abandoned += 1,
            GovernanceOutcome::Attempted(result) if result.success => self.recovered += 1,
            GovernanceOutcome::Attempted(_) => self.recovery_failed += 1,
        }
    }
}

/// Detects device failures and drives recovery.
pub struct FailoverService {
    config: RwLock<FailoverConfig>,
    repository: Arc<dyn DeviceRepository>,
    classifier: FailureClassifier,
    executor: Arc<RecoveryExecutor>,
    tracker: GovernanceTracker,
    journal: Arc<OperationJournal>,
}

impl FailoverService {
    /// Start building a service over `collaborators`.
    #[must_use]
    pub fn builder(collaborators: Collaborators) -> FailoverServiceBuilder {
        FailoverServiceBuilder::new(collaborators)
    }

    /// Run one detection cycle. Returns `None` when failover is disabled.
    ///
    /// Failures are handled one at a time; a failing device never stops the
    /// rest of the batch.
    pub async fn run_cycle(&self) -> Option<FailoverCycleReport> {
        let config = self.config.read().await.clone();
        if !config.enabled {
            return None;
        }

        info!("Running failover detection cycle");
        let failures = self.classifier.classify(config.heartbeat_timeout()).await;

        let mut report = FailoverCycleReport {
            failures_detected: failures.len(),
            ..FailoverCycleReport::default()
        };

        if failures.is_empty() {
            return Some(report);
        }
        warn!(count = failures.len(), "Detected device failures");

        for failure in failures {
            let outcome = self.tracker.handle(failure, &config).await;
            report.tally(&outcome);
        }

        info!(
            recovered = report.recovered,
            failed = report.recovery_failed,
            skipped = report.skipped,
            abandoned = report.abandoned,
            "Failover cycle complete"
        );
        Some(report)
    }

    /// Pass one failure through governance and, if allowed, recovery.
    pub async fn handle_failure(&self, failure: Failure) -> GovernanceOutcome {
        let config = self.config.read().await.clone();
        self.tracker.handle(failure, &config).await
    }

    /// Recover a device now, ignoring cooldown and the failure ceiling.
    ///
    /// A success also lifts a permanent-failure mark.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` for an unknown device, or the
    /// repository error if the lookup fails.
    pub async fn trigger_manual_recovery(&self, device_id: &DeviceId) -> Result<RecoveryResult> {
        let device = self
            .repository
            .get(device_id)
            .await?
            .ok_or_else(|| Error::device_not_found(device_id.as_str()))?;

        info!(device_id = %device_id, "Manual recovery triggered");

        let config = self.config.read().await.clone();
        let failure = Failure::new(
            device_id.clone(),
            FailureType::HighErrorRate,
            Severity::Medium,
            "Manual recovery triggered",
        )
        .with_metadata("manual", json!(true));

        let strategy = select_strategy(&failure, &device, &config);
        let result = self.executor.execute(&device, strategy, &config).await;

        if result.success {
            self.lift_permanent_mark(device_id).await;
        }
        self.tracker
            .settle(&result, failure.failure_type.as_str())
            .await;

        Ok(result)
    }

    async fn lift_permanent_mark(&self, device_id: &DeviceId) {
        let Some(device) = self
            .repository
            .get(device_id)
            .await
            .into_option_logged()
            .flatten()
        else {
            return;
        };
        if !device.is_permanently_failed() {
            return;
        }

        let mut cleared = device.clone();
        cleared.metadata.remove(META_PERMANENT_FAILURE);
        if let Err(e) = self
            .journal
            .journaled_update(&device, &cleared, EXECUTED_BY, true)
            .await
        {
            error!(device_id = %device_id, error = %e, "Failed to clear permanent failure mark");
        }
    }

    /// Failure history for one device, or every device.
    pub async fn failure_history(&self, device_id: Option<&DeviceId>) -> Vec<Failure> {
        self.tracker.store().failure_history(device_id).await
    }

    /// Retained recovery results, oldest first.
    pub async fn migration_history(&self) -> Vec<RecoveryResult> {
        self.tracker.store().migration_history().await
    }

    pub async fn statistics(&self) -> FailoverStatistics {
        let store = self.tracker.store();
        let failures = store.failure_history(None).await;
        let active = store.devices_with_failures().await;
        let migrations = store.migration_history().await;
        FailoverStatistics::compute(&failures, active, &migrations)
    }

    /// Merged migration and failure records, newest first.
    pub async fn failover_records(&self, query: &FailoverRecordQuery) -> Page<FailoverRecord> {
        let store = self.tracker.store();
        let migrations = store.migration_history().await;
        let failures = store.failure_history(None).await;
        failover_records(&migrations, &failures, query)
    }

    pub async fn config(&self) -> FailoverConfig {
        self.config.read().await.clone()
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the merged configuration is invalid;
    /// the current configuration is then left untouched.
    pub async fn update_config(&self, update: &FailoverConfigUpdate) -> Result<FailoverConfig> {
        let mut config = self.config.write().await;
        let merged = config.merged(update)?;
        *config = merged.clone();
        info!("Failover configuration updated");
        Ok(merged)
    }

    /// The governance store.
    #[must_use]
    pub fn governance_store(&self) -> &Arc<dyn GovernanceStore> {
        self.tracker.store()
    }

    /// The journal device writes are recorded in.
    #[must_use]
    pub fn journal(&self) -> &Arc<OperationJournal> {
        &self.journal
    }
}

/// Builder for [`FailoverService`].
pub struct FailoverServiceBuilder {
    collaborators: Collaborators,
    config: FailoverConfig,
    governance: Option<Arc<dyn GovernanceStore>>,
    journal: Option<Arc<OperationJournal>>,
    restart_policy: RetryPolicy,
    create_policy: RetryPolicy,
}

impl FailoverServiceBuilder {
    #[must_use]
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            config: FailoverConfig::default(),
            governance: None,
            journal: None,
            restart_policy: RetryPolicy::RESTART,
            create_policy: RetryPolicy::CREATE,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: FailoverConfig) -> Self {
        self.config = config;
        self
    }

    /// Share governance state, e.g. across replicas.
    #[must_use]
    pub fn with_governance_store(mut self, store: Arc<dyn GovernanceStore>) -> Self {
        self.governance = Some(store);
        self
    }

    /// Record device writes in an existing journal.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<OperationJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    #[must_use]
    pub const fn with_restart_policy(mut self, policy: RetryPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_create_policy(mut self, policy: RetryPolicy) -> Self {
        self.create_policy = policy;
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration is invalid.
    pub fn build(self) -> Result<FailoverService> {
        self.config.validate()?;

        let Collaborators {
            repository,
            runtime,
            snapshots,
            ports,
            events,
        } = self.collaborators;

        let journal = self
            .journal
            .unwrap_or_else(|| Arc::new(OperationJournal::new(repository.clone())));
        let governance = self
            .governance
            .unwrap_or_else(|| Arc::new(InMemoryGovernanceStore::new()));

        let executor = Arc::new(
            RecoveryExecutor::new(runtime.clone(), snapshots, ports, journal.clone())
                .with_restart_policy(self.restart_policy)
                .with_create_policy(self.create_policy),
        );
        let tracker = GovernanceTracker::new(
            governance,
            repository.clone(),
            executor.clone(),
            journal.clone(),
            events,
        );

        Ok(FailoverService {
            config: RwLock::new(self.config),
            classifier: FailureClassifier::new(repository.clone(), runtime),
            repository,
            executor,
            tracker,
            journal,
        })
    }
}
