//! Collaborator contracts consumed by the engine.
//!
//! The engine never talks to a database, a container runtime, the snapshot
//! service, the port allocator or the cluster lock directly. It goes through
//! these traits, which keeps every component testable against the in-memory
//! adapters in [`crate::memory`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_core::{ContainerId, DeviceId, DeviceSnapshot, DeviceStatus, ResourceSpec, Result};
use warden_events::EventSink;

/// Label carried by every container the fleet manages.
pub const MANAGED_LABEL: &str = "com.cloudphone.managed";
/// Label linking a container back to its device record.
pub const DEVICE_LABEL: &str = "com.cloudphone.device-id";

/// A single write applied inside a persistence transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityWrite {
    /// Overlay `fields` onto the existing device record.
    Patch { device_id: DeviceId, fields: Value },
    /// Insert (or replace) a full device record.
    Insert(DeviceSnapshot),
}

/// Persistence layer for device records.
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Devices whose status is one of `statuses`.
    async fn find_by_statuses(&self, statuses: &[DeviceStatus]) -> Result<Vec<DeviceSnapshot>>;

    /// One device by id.
    async fn get(&self, device_id: &DeviceId) -> Result<Option<DeviceSnapshot>>;

    /// Persist a device record.
    async fn save(&self, device: &DeviceSnapshot) -> Result<()>;

    /// Container ids referenced by any device record.
    async fn list_container_ids(&self) -> Result<HashSet<ContainerId>>;

    /// Apply all `writes` atomically: either every write lands or none do.
    async fn apply_in_transaction(&self, writes: Vec<EntityWrite>) -> Result<()>;
}

/// Health-check verdict reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
}

/// Result of inspecting one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInspection {
    pub id: ContainerId,
    pub running: bool,
    /// Runtime status string such as `running`, `exited`, `paused`.
    pub status: String,
    pub dead: bool,
    pub exit_code: Option<i64>,
    pub health: Option<HealthStatus>,
}

impl ContainerInspection {
    /// A running, healthy container.
    pub fn running(id: impl Into<ContainerId>) -> Self {
        Self {
            id: id.into(),
            running: true,
            status: "running".to_string(),
            dead: false,
            exit_code: None,
            health: Some(HealthStatus::Healthy),
        }
    }

    /// Whether the process inside the container is gone.
    #[must_use]
    pub fn is_exited(&self) -> bool {
        self.dead || self.status == "exited" || self.status == "dead"
    }

    /// Whether the runtime health check reports failure.
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        self.health == Some(HealthStatus::Unhealthy)
    }

    /// Device status that matches what the runtime reports.
    #[must_use]
    pub fn observed_status(&self) -> DeviceStatus {
        match (self.running, self.status.as_str()) {
            (true, _) => DeviceStatus::Running,
            (false, "paused") => DeviceStatus::Paused,
            (false, _) => DeviceStatus::Stopped,
        }
    }
}

/// A container listed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedContainer {
    pub id: ContainerId,
    pub labels: HashMap<String, String>,
    pub names: Vec<String>,
}

impl ManagedContainer {
    /// Whether the container carries the fleet management label.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.labels.get(MANAGED_LABEL).is_some_and(|v| v == "true")
    }

    /// Device the container was created for, if labelled.
    #[must_use]
    pub fn device_id(&self) -> Option<DeviceId> {
        self.labels.get(DEVICE_LABEL).map(|id| DeviceId::new(id.as_str()))
    }

    /// First listed name, if any.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.names.first().map_or("", String::as_str)
    }
}

/// Everything the runtime needs to create a device container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub resources: ResourceSpec,
    pub adb_port: u16,
    pub webrtc_port: u16,
    pub labels: HashMap<String, String>,
}

/// Container runtime client.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Inspect one container. A missing container is `Error::ContainerNotFound`.
    async fn inspect(&self, container_id: &ContainerId) -> Result<ContainerInspection>;

    /// Restart a container in place.
    async fn restart(&self, container_id: &ContainerId) -> Result<()>;

    /// Stop a container.
    async fn stop(&self, container_id: &ContainerId) -> Result<()>;

    /// Remove a container.
    async fn remove(&self, container_id: &ContainerId) -> Result<()>;

    /// List containers, including stopped ones.
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>>;

    /// Create and start a container, returning its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId>;
}

/// A ready snapshot of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub id: String,
    pub device_id: DeviceId,
    pub created_at: DateTime<Utc>,
}

/// Options for restoring a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Replace the original device instead of creating a sibling.
    pub replace_original: bool,
}

/// Snapshot subsystem.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Most recent snapshot in ready state for the device.
    async fn latest_ready(&self, device_id: &DeviceId) -> Result<Option<SnapshotRef>>;

    /// Restore a snapshot on behalf of `user_id`, returning the new device state.
    async fn restore(
        &self,
        snapshot_id: &str,
        options: RestoreOptions,
        user_id: &str,
    ) -> Result<DeviceSnapshot>;
}

/// Ports handed out for a new container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    pub adb_port: u16,
    pub webrtc_port: u16,
}

/// Port allocator.
#[async_trait]
pub trait PortAllocator: Send + Sync {
    /// Allocate a fresh ADB/WebRTC port pair.
    async fn allocate(&self) -> Result<PortPair>;
}

/// Cluster-wide mutual exclusion.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to take `key` for `ttl`. Returns `false` if another holder has it.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Release `key`.
    async fn release(&self, key: &str) -> Result<()>;
}

/// The collaborators the engine is wired against.
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn DeviceRepository>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub ports: Arc<dyn PortAllocator>,
    pub events: Arc<dyn EventSink>,
}
