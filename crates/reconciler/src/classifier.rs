//! Failure classification.
//!
//! Three independent signals are turned into [`Failure`] records: stale
//! heartbeats, devices already in error, and the container runtime's view of
//! each active device. A failing signal source is logged and contributes
//! nothing; it never hides the others.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, warn};
use warden_core::{DeviceStatus, Result, ResultExt, Severity};

use crate::model::{Failure, FailureType};
use crate::ports::{ContainerRuntime, DeviceRepository};

const ACTIVE_STATUSES: [DeviceStatus; 2] = [DeviceStatus::Running, DeviceStatus::Allocated];

/// Evaluates device and runtime signals into failures.
pub struct FailureClassifier {
    repository: Arc<dyn DeviceRepository>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl FailureClassifier {
    /// Create a classifier over the given collaborators.
    pub fn new(repository: Arc<dyn DeviceRepository>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            repository,
            runtime,
        }
    }

    /// Run every check and collect the failures.
    pub async fn classify(&self, heartbeat_timeout: Duration) -> Vec<Failure> {
        let now = Utc::now();

        let heartbeat = self
            .heartbeat_timeouts(heartbeat_timeout, now)
            .await
            .or_default_logged("heartbeat timeout check", Vec::new());
        let containers = self
            .container_failures()
            .await
            .or_default_logged("container health check", Vec::new());
        let errors = self
            .error_devices()
            .await
            .or_default_logged("error device check", Vec::new());

        debug!(
            heartbeat = heartbeat.len(),
            containers = containers.len(),
            errors = errors.len(),
            "Classified failures"
        );

        heartbeat.into_iter().chain(containers).chain(errors).collect()
    }

    /// Active devices whose heartbeat is missing or older than `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device query fails.
    pub async fn heartbeat_timeouts(
        &self,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Failure>> {
        let threshold = now - timeout;
        let devices = self.repository.find_by_statuses(&ACTIVE_STATUSES).await?;

        Ok(devices
            .into_iter()
            .filter(|device| device.heartbeat_stale(threshold))
            .map(|device| {
                let last = device
                    .last_heartbeat_at
                    .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
                Failure::new(
                    device.id.clone(),
                    FailureType::HeartbeatTimeout,
                    Severity::High,
                    format!("Device heartbeat timeout (last: {last})"),
                )
                .with_metadata("deviceName", json!(device.name))
                .with_metadata("lastHeartbeat", json!(device.last_heartbeat_at))
            })
            .collect())
    }

    /// Devices already in `Error` status.
    ///
    /// # Errors
    ///
    /// Returns an error if the device query fails.
    pub async fn error_devices(&self) -> Result<Vec<Failure>> {
        let devices = self
            .repository
            .find_by_statuses(&[DeviceStatus::Error])
            .await?;

        Ok(devices
            .into_iter()
            .map(|device| {
                Failure::new(
                    device.id.clone(),
                    FailureType::HighErrorRate,
                    Severity::Medium,
                    "Device is in error state",
                )
                .with_metadata("deviceName", json!(device.name))
                .with_metadata("metadata", json!(device.metadata))
            })
            .collect())
    }

    /// Active devices whose container is gone, exited or unhealthy.
    ///
    /// A failed inspection is itself a dead container. Each device is
    /// inspected independently.
    ///
    /// # Errors
    ///
    /// Returns an error if the device query fails.
    pub async fn container_failures(&self) -> Result<Vec<Failure>> {
        let devices = self.repository.find_by_statuses(&ACTIVE_STATUSES).await?;
        let mut failures = Vec::new();

        for device in devices {
            let Some(container_id) = device.container_id.as_ref() else {
                continue;
            };

            match self.runtime.inspect(container_id).await {
                Ok(info) if info.is_exited() => failures.push(
                    Failure::new(
                        device.id.clone(),
                        FailureType::ContainerDead,
                        Severity::Critical,
                        format!("Container is {}", info.status),
                    )
                    .with_metadata("exitCode", json!(info.exit_code))
                    .with_metadata("containerStatus", json!(info.status)),
                ),
                Ok(info) if info.is_unhealthy() => failures.push(Failure::new(
                    device.id.clone(),
                    FailureType::ContainerUnhealthy,
                    Severity::High,
                    "Container health check failed",
                )),
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        device_id = %device.id,
                        container_id = %container_id,
                        error = %e,
                        "Container inspection failed"
                    );
                    failures.push(Failure::new(
                        device.id.clone(),
                        FailureType::ContainerDead,
                        Severity::Critical,
                        format!("Container not found: {e}"),
                    ));
                }
            }
        }

        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use warden_core::{DeviceId, DeviceSnapshot};

    use super::*;
    use crate::memory::{InMemoryContainerRuntime, InMemoryDeviceRepository};
    use crate::ports::{ContainerInspection, HealthStatus};

    struct Fixture {
        repository: Arc<InMemoryDeviceRepository>,
        runtime: Arc<InMemoryContainerRuntime>,
        classifier: FailureClassifier,
    }

    fn fixture() -> Fixture {
        let repository = Arc::new(InMemoryDeviceRepository::new());
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let classifier = FailureClassifier::new(repository.clone(), runtime.clone());
        Fixture {
            repository,
            runtime,
            classifier,
        }
    }

    fn running(id: &str, container: &str) -> DeviceSnapshot {
        DeviceSnapshot::new(id, id)
            .with_status(DeviceStatus::Running)
            .with_container(container)
            .with_heartbeat(Utc::now())
    }

    #[tokio::test]
    async fn test_stale_and_missing_heartbeats_time_out() {
        let f = fixture();
        let now = Utc::now();
        f.repository
            .insert(running("fresh", "c1").with_heartbeat(now - Duration::minutes(2)))
            .await;
        f.repository
            .insert(running("stale", "c2").with_heartbeat(now - Duration::minutes(30)))
            .await;
        let mut never = running("never", "c3");
        never.last_heartbeat_at = None;
        f.repository.insert(never).await;
        f.repository
            .insert(
                DeviceSnapshot::new("stopped", "stopped")
                    .with_status(DeviceStatus::Stopped)
                    .with_heartbeat(now - Duration::minutes(30)),
            )
            .await;

        let mut failures = f
            .classifier
            .heartbeat_timeouts(Duration::minutes(10), now)
            .await
            .unwrap();
        failures.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        let ids: Vec<_> = failures.iter().map(|f| f.device_id.as_str()).collect();
        assert_eq!(ids, vec!["never", "stale"]);
        assert!(failures
            .iter()
            .all(|f| f.failure_type == FailureType::HeartbeatTimeout && f.severity == Severity::High));
    }

    #[tokio::test]
    async fn test_error_devices_become_high_error_rate() {
        let f = fixture();
        f.repository
            .insert(DeviceSnapshot::new("broken", "broken").with_status(DeviceStatus::Error))
            .await;

        let failures = f.classifier.error_devices().await.unwrap();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].failure_type, FailureType::HighErrorRate);
        assert_eq!(failures[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_container_checks() {
        let f = fixture();
        f.repository.insert(running("healthy", "c-ok")).await;
        f.repository.insert(running("exited", "c-exited")).await;
        f.repository.insert(running("sick", "c-sick")).await;
        f.repository.insert(running("gone", "c-gone")).await;

        f.runtime.add(ContainerInspection::running("c-ok"), true).await;
        let mut exited = ContainerInspection::running("c-exited");
        exited.running = false;
        exited.status = "exited".to_string();
        exited.exit_code = Some(137);
        f.runtime.add(exited, true).await;
        let mut sick = ContainerInspection::running("c-sick");
        sick.health = Some(HealthStatus::Unhealthy);
        f.runtime.add(sick, true).await;

        let failures = f.classifier.container_failures().await.unwrap();
        let find = |id: &str| {
            failures
                .iter()
                .find(|f| f.device_id == DeviceId::new(id))
                .cloned()
        };

        assert_eq!(failures.len(), 3);
        assert!(find("healthy").is_none());
        assert_eq!(find("exited").unwrap().failure_type, FailureType::ContainerDead);
        assert_eq!(find("exited").unwrap().severity, Severity::Critical);
        assert_eq!(find("sick").unwrap().failure_type, FailureType::ContainerUnhealthy);
        assert_eq!(find("sick").unwrap().severity, Severity::High);
        assert_eq!(find("gone").unwrap().failure_type, FailureType::ContainerDead);
    }

    #[tokio::test]
    async fn test_classify_survives_failing_repository() {
        let f = fixture();
        f.repository.fail_queries(true).await;

        let failures = f.classifier.classify(Duration::minutes(10)).await;

        assert!(failures.is_empty());
    }
}
