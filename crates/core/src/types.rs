//! Device domain types shared by every Warden crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::result::Result;

/// Metadata key holding the last recorded device error.
pub const META_LAST_ERROR: &str = "lastError";
/// Metadata key holding the timestamp of the last recorded device error.
pub const META_LAST_ERROR_AT: &str = "lastErrorAt";
/// Metadata key set when automatic recovery has been abandoned.
pub const META_PERMANENT_FAILURE: &str = "permanentFailure";

/// Identifier of a device record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a container known to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Create a container ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ContainerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Creating,
    Allocated,
    Running,
    Stopped,
    Paused,
    Error,
    Deleted,
}

impl DeviceStatus {
    /// Stable string form, matching the persisted representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Allocated => "allocated",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Deleted => "deleted",
        }
    }

    /// Statuses in which a device is expected to have a live container.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Allocated)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to failures and inconsistencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-known resource shape of a device, used to recreate its container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub storage_mb: u64,
    pub resolution: String,
    pub dpi: u32,
    pub android_version: String,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpu_cores: 2,
            memory_mb: 4096,
            storage_mb: 8192,
            resolution: "1080x1920".to_string(),
            dpi: 420,
            android_version: "11".to_string(),
        }
    }
}

/// Read-only projection of a device record.
///
/// The engine only changes `status`, `container_id`, `adb_port` and the
/// `lastError*` metadata keys, always through the operation journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub name: String,
    pub status: DeviceStatus,
    pub container_id: Option<ContainerId>,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub adb_port: Option<u16>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resources: ResourceSpec,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DeviceSnapshot {
    /// Create a running-less device shell in `Creating` status.
    pub fn new(id: impl Into<DeviceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: DeviceStatus::Creating,
            container_id: None,
            user_id: None,
            tenant_id: None,
            adb_port: None,
            last_heartbeat_at: None,
            resources: ResourceSpec::default(),
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_container(mut self, container_id: impl Into<ContainerId>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub const fn with_adb_port(mut self, port: u16) -> Self {
        self.adb_port = Some(port);
        self
    }

    #[must_use]
    pub const fn with_heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.last_heartbeat_at = Some(at);
        self
    }

    #[must_use]
    pub fn with_resources(mut self, resources: ResourceSpec) -> Self {
        self.resources = resources;
        self
    }

    /// Whether the heartbeat is missing or older than `threshold`.
    #[must_use]
    pub fn heartbeat_stale(&self, threshold: DateTime<Utc>) -> bool {
        self.last_heartbeat_at.map_or(true, |at| at < threshold)
    }

    /// Record an error reason and timestamp in metadata.
    pub fn record_error(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.metadata
            .insert(META_LAST_ERROR.to_string(), Value::String(reason.into()));
        self.metadata
            .insert(META_LAST_ERROR_AT.to_string(), Value::String(at.to_rfc3339()));
    }

    /// Whether automatic recovery was abandoned for this device.
    #[must_use]
    pub fn is_permanently_failed(&self) -> bool {
        self.metadata
            .get(META_PERMANENT_FAILURE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Serialize to a JSON value for journaling.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the snapshot cannot be encoded.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Rebuild a snapshot from a journaled JSON value.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the value is not a device snapshot.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Overlay the fields present in `patch` onto this snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the patch is not an object or the
    /// merged value no longer describes a device.
    pub fn apply_patch(&self, patch: &Value) -> Result<Self> {
        let Value::Object(fields) = patch else {
            return Err(Error::serialization("device patch must be a JSON object"));
        };
        let mut current = match self.to_value()? {
            Value::Object(map) => map,
            _ => return Err(Error::serialization("device did not encode as an object")),
        };
        for (key, value) in fields {
            current.insert(key.clone(), value.clone());
        }
        Self::from_value(Value::Object(current))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::Duration;

    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&DeviceStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert!(DeviceStatus::Allocated.is_active());
        assert!(!DeviceStatus::Error.is_active());
    }

    #[test]
    fn test_heartbeat_stale_when_missing() {
        let device = DeviceSnapshot::new("d1", "phone");
        assert!(device.heartbeat_stale(Utc::now()));
    }

    #[test]
    fn test_heartbeat_fresh() {
        let now = Utc::now();
        let device = DeviceSnapshot::new("d1", "phone").with_heartbeat(now);
        assert!(!device.heartbeat_stale(now - Duration::minutes(10)));
        assert!(device.heartbeat_stale(now + Duration::seconds(1)));
    }

    #[test]
    fn test_record_error_sets_metadata() {
        let mut device = DeviceSnapshot::new("d1", "phone");
        device.record_error("Container missing", Utc::now());
        assert_eq!(
            device.metadata.get(META_LAST_ERROR).and_then(Value::as_str),
            Some("Container missing")
        );
        assert!(device.metadata.contains_key(META_LAST_ERROR_AT));
    }

    #[test]
    fn test_apply_patch_overrides_only_given_fields() {
        let device = DeviceSnapshot::new("d1", "phone")
            .with_status(DeviceStatus::Stopped)
            .with_container("c1");
        let patched = device
            .apply_patch(&serde_json::json!({ "status": "running" }))
            .unwrap();
        assert_eq!(patched.status, DeviceStatus::Running);
        assert_eq!(patched.container_id, Some(ContainerId::new("c1")));
    }

    #[test]
    fn test_apply_patch_rejects_non_object() {
        let device = DeviceSnapshot::new("d1", "phone");
        assert!(device.apply_patch(&Value::Null).is_err());
    }
}
