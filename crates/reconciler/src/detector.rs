//! Inconsistency detection between device records and the container runtime.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use warden_core::{DeviceStatus, Result, ResultExt, Severity};

use crate::model::{Inconsistency, InconsistencyType};
use crate::ports::{ContainerRuntime, DeviceRepository};

/// Compares device records against the runtime.
pub struct InconsistencyDetector {
    repository: Arc<dyn DeviceRepository>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl InconsistencyDetector {
    /// Create a detector over the given collaborators.
    pub fn new(repository: Arc<dyn DeviceRepository>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            repository,
            runtime,
        }
    }

    /// Run every check. A failing check is logged and contributes nothing.
    pub async fn detect(&self) -> Vec<Inconsistency> {
        let mismatches = self
            .status_mismatches()
            .await
            .or_default_logged("status mismatch check", Vec::new());
        let orphans = self
            .orphaned_containers()
            .await
            .or_default_logged("orphaned container check", Vec::new());
        let missing = self
            .missing_containers()
            .await
            .or_default_logged("missing container check", Vec::new());

        debug!(
            mismatches = mismatches.len(),
            orphans = orphans.len(),
            missing = missing.len(),
            "Detected inconsistencies"
        );

        mismatches.into_iter().chain(orphans).chain(missing).collect()
    }

    /// Running devices whose container exists but is not running.
    ///
    /// Failed inspections are left to [`Self::missing_containers`].
    ///
    /// # Errors
    ///
    /// Returns an error if the device query fails.
    pub async fn status_mismatches(&self) -> Result<Vec<Inconsistency>> {
        let devices = self
            .repository
            .find_by_statuses(&[DeviceStatus::Running])
            .await?;
        let mut found = Vec::new();

        for device in devices {
            let Some(container_id) = device.container_id.clone() else {
                continue;
            };

            let Ok(info) = self.runtime.inspect(&container_id).await else {
                continue;
            };

            if !info.running {
                found.push(
                    Inconsistency::new(
                        InconsistencyType::StatusMismatch,
                        Severity::High,
                        json!({ "status": DeviceStatus::Running }),
                        json!({ "status": info.status, "running": false }),
                        format!(
                            "Database says device is running, but container is {}",
                            info.status
                        ),
                    )
                    .for_device(device.id.clone())
                    .for_container(container_id),
                );
            }
        }

        Ok(found)
    }

    /// Running devices whose container cannot be inspected.
    ///
    /// A container the runtime reports as gone is critical; any other
    /// inspection error is high.
    ///
    /// # Errors
    ///
    /// Returns an error if the device query fails.
    pub async fn missing_containers(&self) -> Result<Vec<Inconsistency>> {
        let devices = self
            .repository
            .find_by_statuses(&[DeviceStatus::Running])
            .await?;
        let mut found = Vec::new();

        for device in devices {
            let Some(container_id) = device.container_id.clone() else {
                continue;
            };

            if let Err(e) = self.runtime.inspect(&container_id).await {
                let severity = if e.is_not_found() {
                    Severity::Critical
                } else {
                    Severity::High
                };
                found.push(
                    Inconsistency::new(
                        InconsistencyType::MissingContainer,
                        severity,
                        json!({ "containerExists": true }),
                        json!({ "containerExists": false, "error": e.to_string() }),
                        format!("Container {container_id} missing for device {}", device.id),
                    )
                    .for_device(device.id.clone())
                    .for_container(container_id),
                );
            }
        }

        Ok(found)
    }

    /// Managed containers that no device record references.
    ///
    /// A container labelled for a device that still exists is skipped: it is
    /// a replacement whose record has not been saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if either the runtime listing or a device query fails.
    pub async fn orphaned_containers(&self) -> Result<Vec<Inconsistency>> {
        let containers = self.runtime.list_managed().await.inspect_error(|e| {
            warn!(error = %e, "Failed to list managed containers");
        })?;
        let known = self.repository.list_container_ids().await?;
        let mut found = Vec::new();

        for container in containers {
            if !container.is_managed() || known.contains(&container.id) {
                continue;
            }
            if let Some(device_id) = container.device_id() {
                if self.repository.get(&device_id).await?.is_some() {
                    debug!(
                        container_id = %container.id,
                        device_id = %device_id,
                        "Skipping container claimed by an existing device"
                    );
                    continue;
                }
            }

            found.push(
                Inconsistency::new(
                    InconsistencyType::OrphanedContainer,
                    Severity::Medium,
                    json!({ "inDatabase": true }),
                    json!({ "inDatabase": false }),
                    format!(
                        "Container {} ({}) exists but has no database record",
                        container.id,
                        container.display_name()
                    ),
                )
                .for_container(container.id),
            );
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::collections::HashMap;

    use warden_core::{ContainerId, DeviceId, DeviceSnapshot, ResourceSpec};

    use super::*;
    use crate::memory::{InMemoryContainerRuntime, InMemoryDeviceRepository};
    use crate::ports::{ContainerInspection, ContainerSpec, DEVICE_LABEL, MANAGED_LABEL};

    fn setup() -> (
        Arc<InMemoryDeviceRepository>,
        Arc<InMemoryContainerRuntime>,
        InconsistencyDetector,
    ) {
        let repository = Arc::new(InMemoryDeviceRepository::new());
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let detector = InconsistencyDetector::new(repository.clone(), runtime.clone());
        (repository, runtime, detector)
    }

    fn running(id: &str, container: &str) -> DeviceSnapshot {
        DeviceSnapshot::new(id, id)
            .with_status(DeviceStatus::Running)
            .with_container(container)
    }

    #[tokio::test]
    async fn test_orphan_detection() {
        let (repository, runtime, detector) = setup();
        repository.insert(running("device-a", "A")).await;
        runtime.add(ContainerInspection::running("A"), true).await;
        runtime.add(ContainerInspection::running("B"), true).await;
        runtime.add(ContainerInspection::running("unmanaged"), false).await;

        let orphans = detector.orphaned_containers().await.unwrap();

        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].kind, InconsistencyType::OrphanedContainer);
        assert_eq!(orphans[0].container_id, Some(ContainerId::new("B")));
        assert!(orphans[0].device_id.is_none());
        assert_eq!(orphans[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_replacement_for_existing_device_is_not_orphan() {
        let (repository, runtime, detector) = setup();
        // Record still points at the container being replaced.
        repository.insert(running("device-a", "old")).await;
        let spec = ContainerSpec {
            name: "device-a-recreated".to_string(),
            resources: ResourceSpec::default(),
            adb_port: 40_000,
            webrtc_port: 40_001,
            labels: HashMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (DEVICE_LABEL.to_string(), "device-a".to_string()),
            ]),
        };
        runtime.create(&spec).await.unwrap();
        let mut gone = spec.clone();
        gone.labels
            .insert(DEVICE_LABEL.to_string(), "deleted-device".to_string());
        let stray = runtime.create(&gone).await.unwrap();

        let orphans = detector.orphaned_containers().await.unwrap();

        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].container_id, Some(stray));
    }

    #[tokio::test]
    async fn test_stopped_container_is_status_mismatch() {
        let (repository, runtime, detector) = setup();
        repository.insert(running("device-1", "c1")).await;
        let mut stopped = ContainerInspection::running("c1");
        stopped.running = false;
        stopped.status = "exited".to_string();
        runtime.add(stopped, true).await;

        let found = detector.detect().await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, InconsistencyType::StatusMismatch);
        assert_eq!(found[0].device_id, Some(DeviceId::new("device-1")));
        assert_eq!(found[0].actual_state["status"], "exited");
    }

    #[tokio::test]
    async fn test_missing_container_reported_once() {
        let (repository, _runtime, detector) = setup();
        repository.insert(running("device-1", "gone")).await;

        let found = detector.detect().await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, InconsistencyType::MissingContainer);
        assert_eq!(found[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_runtime_error_is_high_severity_missing() {
        let (repository, runtime, detector) = setup();
        repository.insert(running("device-1", "c1")).await;
        runtime.add(ContainerInspection::running("c1"), true).await;
        runtime.fail_inspections(true).await;

        let found = detector.missing_containers().await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_listing_failure_does_not_block_other_checks() {
        let (repository, runtime, detector) = setup();
        repository.insert(running("device-1", "gone")).await;
        runtime.fail_listing(true).await;

        let found = detector.detect().await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, InconsistencyType::MissingContainer);
    }
}
