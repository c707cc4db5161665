//! In-memory collaborator implementations.
//!
//! Used by the test suites and the `simulate` command. Each adapter carries
//! failure switches so callers can exercise the engine's error paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use warden_core::{ContainerId, DeviceId, DeviceSnapshot, DeviceStatus, Error, Result};

use crate::ports::{
    ContainerInspection, ContainerRuntime, ContainerSpec, DeviceRepository, DistributedLock,
    EntityWrite, ManagedContainer, PortAllocator, PortPair, RestoreOptions, SnapshotRef,
    SnapshotStore, MANAGED_LABEL,
};

// ============================================================================
// Device repository
// ============================================================================

#[derive(Default)]
struct RepositoryState {
    devices: BTreeMap<DeviceId, DeviceSnapshot>,
    fail_queries: bool,
    fail_saves: bool,
    fail_transactions: bool,
}

/// Device records held in a map.
#[derive(Default)]
pub struct InMemoryDeviceRepository {
    state: RwLock<RepositoryState>,
}

impl InMemoryDeviceRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a device.
    pub async fn insert(&self, device: DeviceSnapshot) {
        self.state
            .write()
            .await
            .devices
            .insert(device.id.clone(), device);
    }

    /// Every stored device, ordered by id.
    pub async fn all(&self) -> Vec<DeviceSnapshot> {
        self.state.read().await.devices.values().cloned().collect()
    }

    /// Make every status query fail.
    pub async fn fail_queries(&self, fail: bool) {
        self.state.write().await.fail_queries = fail;
    }

    /// Make every save fail without storing anything.
    pub async fn fail_saves(&self, fail: bool) {
        self.state.write().await.fail_saves = fail;
    }

    /// Make every transaction fail without applying anything.
    pub async fn fail_transactions(&self, fail: bool) {
        self.state.write().await.fail_transactions = fail;
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDeviceRepository {
    async fn find_by_statuses(&self, statuses: &[DeviceStatus]) -> Result<Vec<DeviceSnapshot>> {
        let state = self.state.read().await;
        if state.fail_queries {
            return Err(Error::persistence("find_by_statuses", "query failed"));
        }
        Ok(state
            .devices
            .values()
            .filter(|device| statuses.contains(&device.status))
            .cloned()
            .collect())
    }

    async fn get(&self, device_id: &DeviceId) -> Result<Option<DeviceSnapshot>> {
        let state = self.state.read().await;
        if state.fail_queries {
            return Err(Error::persistence("get", "query failed"));
        }
        Ok(state.devices.get(device_id).cloned())
    }

    async fn save(&self, device: &DeviceSnapshot) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_saves {
            return Err(Error::persistence("save", "write rejected"));
        }
        state.devices.insert(device.id.clone(), device.clone());
        Ok(())
    }

    async fn list_container_ids(&self) -> Result<HashSet<ContainerId>> {
        let state = self.state.read().await;
        if state.fail_queries {
            return Err(Error::persistence("list_container_ids", "query failed"));
        }
        Ok(state
            .devices
            .values()
            .filter_map(|device| device.container_id.clone())
            .collect())
    }

    async fn apply_in_transaction(&self, writes: Vec<EntityWrite>) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_transactions {
            return Err(Error::persistence("transaction", "transaction aborted"));
        }

        // Stage everything first so a bad write leaves the map untouched.
        let mut staged = Vec::with_capacity(writes.len());
        for write in writes {
            let device = match write {
                EntityWrite::Patch { device_id, fields } => state
                    .devices
                    .get(&device_id)
                    .ok_or_else(|| Error::device_not_found(device_id.as_str()))?
                    .apply_patch(&fields)?,
                EntityWrite::Insert(device) => device,
            };
            staged.push(device);
        }

        for device in staged {
            state.devices.insert(device.id.clone(), device);
        }
        Ok(())
    }
}

// ============================================================================
// Container runtime
// ============================================================================

#[derive(Default)]
struct RuntimeState {
    containers: BTreeMap<ContainerId, (ContainerInspection, ManagedContainer)>,
    fail_inspections: bool,
    fail_listing: bool,
    fail_creates: bool,
    failing_restarts: u32,
    restarts: u32,
    creates: u32,
    next_id: u64,
}

/// Containers held in a map.
#[derive(Default)]
pub struct InMemoryContainerRuntime {
    state: RwLock<RuntimeState>,
}

impl InMemoryContainerRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a container. Managed containers carry the fleet label.
    pub async fn add(&self, inspection: ContainerInspection, managed: bool) {
        let labels = if managed {
            HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())])
        } else {
            HashMap::new()
        };
        let listing = ManagedContainer {
            id: inspection.id.clone(),
            labels,
            names: vec![format!("/{}", inspection.id)],
        };
        self.state
            .write()
            .await
            .containers
            .insert(inspection.id.clone(), (inspection, listing));
    }

    /// Whether the container exists.
    pub async fn contains(&self, container_id: &ContainerId) -> bool {
        self.state.read().await.containers.contains_key(container_id)
    }

    /// Make every inspection fail with a runtime error.
    pub async fn fail_inspections(&self, fail: bool) {
        self.state.write().await.fail_inspections = fail;
    }

    /// Make listing fail.
    pub async fn fail_listing(&self, fail: bool) {
        self.state.write().await.fail_listing = fail;
    }

    /// Make container creation fail.
    pub async fn fail_creates(&self, fail: bool) {
        self.state.write().await.fail_creates = fail;
    }

    /// Fail the next `count` restarts.
    pub async fn fail_restarts(&self, count: u32) {
        self.state.write().await.failing_restarts = count;
    }

    /// Restart calls made, successful or not.
    pub async fn restart_count(&self) -> u32 {
        self.state.read().await.restarts
    }

    /// Create calls made, successful or not.
    pub async fn create_count(&self) -> u32 {
        self.state.read().await.creates
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryContainerRuntime {
    async fn inspect(&self, container_id: &ContainerId) -> Result<ContainerInspection> {
        let state = self.state.read().await;
        if state.fail_inspections {
            return Err(Error::runtime("inspect", "runtime unavailable"));
        }
        state
            .containers
            .get(container_id)
            .map(|(inspection, _)| inspection.clone())
            .ok_or_else(|| Error::container_not_found(container_id.as_str()))
    }

    async fn restart(&self, container_id: &ContainerId) -> Result<()> {
        let mut state = self.state.write().await;
        state.restarts = state.restarts.saturating_add(1);
        if state.failing_restarts > 0 {
            state.failing_restarts -= 1;
            return Err(Error::runtime("restart", "restart timed out"));
        }

        let (inspection, _) = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| Error::container_not_found(container_id.as_str()))?;
        inspection.running = true;
        inspection.status = "running".to_string();
        inspection.dead = false;
        inspection.exit_code = None;
        inspection.health = None;
        Ok(())
    }

    async fn stop(&self, container_id: &ContainerId) -> Result<()> {
        let mut state = self.state.write().await;
        let (inspection, _) = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| Error::container_not_found(container_id.as_str()))?;
        inspection.running = false;
        inspection.status = "exited".to_string();
        Ok(())
    }

    async fn remove(&self, container_id: &ContainerId) -> Result<()> {
        self.state
            .write()
            .await
            .containers
            .remove(container_id)
            .map(|_| ())
            .ok_or_else(|| Error::container_not_found(container_id.as_str()))
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        let state = self.state.read().await;
        if state.fail_listing {
            return Err(Error::runtime("list", "runtime unavailable"));
        }
        Ok(state
            .containers
            .values()
            .map(|(_, listing)| listing.clone())
            .collect())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let mut state = self.state.write().await;
        state.creates = state.creates.saturating_add(1);
        if state.fail_creates {
            return Err(Error::runtime("create", "image pull failed"));
        }

        state.next_id = state.next_id.saturating_add(1);
        let id = ContainerId::new(format!("container-{}", state.next_id));
        let listing = ManagedContainer {
            id: id.clone(),
            labels: spec.labels.clone(),
            names: vec![format!("/{}", spec.name)],
        };
        state
            .containers
            .insert(id.clone(), (ContainerInspection::running(id.clone()), listing));
        Ok(id)
    }
}

// ============================================================================
// Snapshot store
// ============================================================================

#[derive(Default)]
struct SnapshotState {
    snapshots: Vec<(SnapshotRef, DeviceSnapshot)>,
    fail_restores: bool,
    restored: u64,
}

/// Ready snapshots paired with the device image they restore to.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    state: RwLock<SnapshotState>,
}

impl InMemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ready snapshot of `image`.
    pub async fn add_ready(&self, snapshot_id: impl Into<String>, image: DeviceSnapshot) {
        let snapshot = SnapshotRef {
            id: snapshot_id.into(),
            device_id: image.id.clone(),
            created_at: Utc::now(),
        };
        self.state.write().await.snapshots.push((snapshot, image));
    }

    /// Make every restore fail.
    pub async fn fail_restores(&self, fail: bool) {
        self.state.write().await.fail_restores = fail;
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn latest_ready(&self, device_id: &DeviceId) -> Result<Option<SnapshotRef>> {
        Ok(self
            .state
            .read()
            .await
            .snapshots
            .iter()
            .filter(|(snapshot, _)| snapshot.device_id == *device_id)
            .max_by_key(|(snapshot, _)| snapshot.created_at)
            .map(|(snapshot, _)| snapshot.clone()))
    }

    async fn restore(
        &self,
        snapshot_id: &str,
        _options: RestoreOptions,
        _user_id: &str,
    ) -> Result<DeviceSnapshot> {
        let mut state = self.state.write().await;
        if state.fail_restores {
            return Err(Error::snapshot(format!("restore of {snapshot_id} failed")));
        }

        let image = state
            .snapshots
            .iter()
            .find(|(snapshot, _)| snapshot.id == snapshot_id)
            .map(|(_, image)| image.clone())
            .ok_or_else(|| Error::snapshot(format!("snapshot {snapshot_id} not found")))?;

        state.restored = state.restored.saturating_add(1);
        Ok(image
            .with_container(format!("restored-{}", state.restored))
            .with_status(DeviceStatus::Running))
    }
}

// ============================================================================
// Port allocator
// ============================================================================

struct PortState {
    next: u16,
    fail: bool,
}

/// Hands out consecutive port pairs.
pub struct InMemoryPortAllocator {
    state: RwLock<PortState>,
}

impl InMemoryPortAllocator {
    /// Start allocating ADB ports at `first_port`; WebRTC ports follow at +1000.
    #[must_use]
    pub fn new(first_port: u16) -> Self {
        Self {
            state: RwLock::new(PortState {
                next: first_port,
                fail: false,
            }),
        }
    }

    /// Make allocation fail.
    pub async fn fail(&self, fail: bool) {
        self.state.write().await.fail = fail;
    }
}

#[async_trait]
impl PortAllocator for InMemoryPortAllocator {
    async fn allocate(&self) -> Result<PortPair> {
        let mut state = self.state.write().await;
        if state.fail {
            return Err(Error::port_allocation("no free ports"));
        }

        let adb_port = state.next;
        let webrtc_port = adb_port
            .checked_add(1000)
            .ok_or_else(|| Error::port_allocation("port range exhausted"))?;
        state.next = adb_port
            .checked_add(1)
            .ok_or_else(|| Error::port_allocation("port range exhausted"))?;

        Ok(PortPair {
            adb_port,
            webrtc_port,
        })
    }
}

// ============================================================================
// Distributed lock
// ============================================================================

/// Process-local lock with expiring leases.
#[derive(Default)]
pub struct InMemoryLock {
    leases: RwLock<HashMap<String, Instant>>,
    grants: RwLock<HashMap<String, u32>>,
    unavailable: RwLock<bool>,
}

impl InMemoryLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every acquire fail with a lock error.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    /// Whether `key` is currently held.
    pub async fn is_held(&self, key: &str) -> bool {
        self.leases
            .read()
            .await
            .get(key)
            .is_some_and(|expiry| *expiry > Instant::now())
    }

    /// Times `key` has been granted.
    pub async fn grant_count(&self, key: &str) -> u32 {
        self.grants.read().await.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        if *self.unavailable.read().await {
            return Err(Error::lock("lock service unavailable"));
        }

        let now = Instant::now();
        let mut leases = self.leases.write().await;
        if leases.get(key).is_some_and(|expiry| *expiry > now) {
            return Ok(false);
        }
        leases.insert(key.to_string(), now + ttl);
        *self.grants.write().await.entry(key.to_string()).or_default() += 1;
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.leases.write().await.remove(key);
        Ok(())
    }
}
