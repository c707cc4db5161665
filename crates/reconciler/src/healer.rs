//! Self-healing of detected inconsistencies.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use warden_core::{DeviceSnapshot, DeviceStatus, Error, Result};

use crate::journal::{OperationId, OperationJournal};
use crate::model::{HealingResult, Inconsistency, InconsistencyType};
use crate::ports::{ContainerRuntime, DeviceRepository};

const EXECUTED_BY: &str = "self-healer";
const ALREADY_CONSISTENT: &str = "Already consistent";

/// Applies the remedy for each inconsistency type.
pub struct SelfHealer {
    repository: Arc<dyn DeviceRepository>,
    runtime: Arc<dyn ContainerRuntime>,
    journal: Arc<OperationJournal>,
}

impl SelfHealer {
    pub fn new(
        repository: Arc<dyn DeviceRepository>,
        runtime: Arc<dyn ContainerRuntime>,
        journal: Arc<OperationJournal>,
    ) -> Self {
        Self {
            repository,
            runtime,
            journal,
        }
    }

    /// Heal one inconsistency. Errors are folded into the result.
    pub async fn heal(&self, inconsistency: &Inconsistency) -> HealingResult {
        let outcome = match inconsistency.kind {
            InconsistencyType::StatusMismatch => self.fix_status_mismatch(inconsistency).await,
            InconsistencyType::MissingContainer => self.fix_missing_container(inconsistency).await,
            InconsistencyType::OrphanedContainer => {
                self.remove_orphan(inconsistency).await.map(|action| (action, None))
            }
        };

        match outcome {
            Ok((action, operation_id)) => {
                info!(kind = %inconsistency.kind, action = %action, "Healed inconsistency");
                HealingResult::healed(inconsistency.clone(), action, operation_id)
            }
            Err(e) => {
                warn!(kind = %inconsistency.kind, error = %e, "Self-healing failed");
                HealingResult::failed(inconsistency.clone(), e.to_string())
            }
        }
    }

    /// Align the device record with what the runtime reports now.
    async fn fix_status_mismatch(
        &self,
        inconsistency: &Inconsistency,
    ) -> Result<(String, Option<OperationId>)> {
        let device = self.load_device(inconsistency).await?;
        if !still_detected(&device, inconsistency) {
            return Ok((ALREADY_CONSISTENT.to_string(), None));
        }

        let container_id = inconsistency
            .container_id
            .as_ref()
            .ok_or_else(|| Error::precondition("status mismatch has no container id"))?;
        let observed = self.runtime.inspect(container_id).await?.observed_status();
        if observed == device.status {
            return Ok((ALREADY_CONSISTENT.to_string(), None));
        }

        let updated = device.clone().with_status(observed);
        let operation_id = self
            .journal
            .journaled_update(&device, &updated, EXECUTED_BY, true)
            .await?;

        Ok((
            format!("Updated device status to {}", observed.as_str()),
            operation_id,
        ))
    }

    /// Hand the device to failover by moving it to `Error`.
    async fn fix_missing_container(
        &self,
        inconsistency: &Inconsistency,
    ) -> Result<(String, Option<OperationId>)> {
        let device = self.load_device(inconsistency).await?;
        if !still_detected(&device, inconsistency) {
            return Ok((ALREADY_CONSISTENT.to_string(), None));
        }

        let mut updated = device.clone().with_status(DeviceStatus::Error);
        updated.record_error("Container missing", Utc::now());
        let operation_id = self
            .journal
            .journaled_update(&device, &updated, EXECUTED_BY, true)
            .await?;

        Ok(("Marked device as error for failover".to_string(), operation_id))
    }

    async fn remove_orphan(&self, inconsistency: &Inconsistency) -> Result<String> {
        let container_id = inconsistency
            .container_id
            .as_ref()
            .ok_or_else(|| Error::precondition("orphaned container has no container id"))?;

        // A recovery may have adopted the container since detection.
        if self
            .repository
            .list_container_ids()
            .await?
            .contains(container_id)
        {
            return Ok(ALREADY_CONSISTENT.to_string());
        }

        self.runtime.remove(container_id).await?;
        Ok(format!("Removed orphaned container {container_id}"))
    }

    async fn load_device(&self, inconsistency: &Inconsistency) -> Result<DeviceSnapshot> {
        let device_id = inconsistency
            .device_id
            .as_ref()
            .ok_or_else(|| Error::precondition("inconsistency has no device id"))?;
        self.repository
            .get(device_id)
            .await?
            .ok_or_else(|| Error::device_not_found(device_id.as_str()))
    }
}

/// Whether the record still looks the way it did when the check ran.
fn still_detected(device: &DeviceSnapshot, inconsistency: &Inconsistency) -> bool {
    device.status == DeviceStatus::Running && device.container_id == inconsistency.container_id
}
