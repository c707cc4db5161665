//! Detection and recovery records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden_core::{ContainerId, DeviceId, Severity};

use crate::journal::OperationId;

/// Symptom that requires recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    HeartbeatTimeout,
    ContainerDead,
    ContainerUnhealthy,
    HighErrorRate,
    ResourceExhausted,
}

impl FailureType {
    /// Every failure type, for zero-initialised breakdowns.
    pub const ALL: [Self; 5] = [
        Self::HeartbeatTimeout,
        Self::ContainerDead,
        Self::ContainerUnhealthy,
        Self::HighErrorRate,
        Self::ResourceExhausted,
    ];

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ContainerDead => "container_dead",
            Self::ContainerUnhealthy => "container_unhealthy",
            Self::HighErrorRate => "high_error_rate",
            Self::ResourceExhausted => "resource_exhausted",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected device failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub device_id: DeviceId,
    pub failure_type: FailureType,
    pub severity: Severity,
    pub details: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Failure {
    /// Create a failure stamped with the current time.
    pub fn new(
        device_id: DeviceId,
        failure_type: FailureType,
        severity: Severity,
        details: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            failure_type,
            severity,
            details: details.into(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Override the detection time.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Kind of divergence between the database and the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyType {
    StatusMismatch,
    MissingContainer,
    OrphanedContainer,
}

impl InconsistencyType {
    /// Every inconsistency type, for zero-initialised breakdowns.
    pub const ALL: [Self; 3] = [
        Self::StatusMismatch,
        Self::MissingContainer,
        Self::OrphanedContainer,
    ];

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatusMismatch => "status_mismatch",
            Self::MissingContainer => "missing_container",
            Self::OrphanedContainer => "orphaned_container",
        }
    }
}

impl fmt::Display for InconsistencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected state divergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inconsistency {
    pub kind: InconsistencyType,
    /// Absent for orphaned containers.
    pub device_id: Option<DeviceId>,
    pub container_id: Option<ContainerId>,
    pub expected_state: Value,
    pub actual_state: Value,
    pub severity: Severity,
    pub details: String,
    pub auto_fixable: bool,
    pub timestamp: DateTime<Utc>,
}

impl Inconsistency {
    /// Create an auto-fixable inconsistency stamped with the current time.
    pub fn new(
        kind: InconsistencyType,
        severity: Severity,
        expected_state: Value,
        actual_state: Value,
        details: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            device_id: None,
            container_id: None,
            expected_state,
            actual_state,
            severity,
            details: details.into(),
            auto_fixable: true,
            timestamp: Utc::now(),
        }
    }

    /// Attach the device the divergence concerns.
    #[must_use]
    pub fn for_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Attach the container the divergence concerns.
    #[must_use]
    pub fn for_container(mut self, container_id: ContainerId) -> Self {
        self.container_id = Some(container_id);
        self
    }

    /// Override the detection time.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// How a failed device is brought back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    RestartContainer,
    RestoreFromSnapshot,
    Recreate,
}

impl RecoveryStrategy {
    /// Every strategy, for zero-initialised breakdowns.
    pub const ALL: [Self; 3] = [
        Self::RestartContainer,
        Self::RestoreFromSnapshot,
        Self::Recreate,
    ];

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RestartContainer => "restart_container",
            Self::RestoreFromSnapshot => "restore_from_snapshot",
            Self::Recreate => "recreate",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one recovery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub device_id: DeviceId,
    /// Strategy chosen by the selector.
    pub selected_strategy: RecoveryStrategy,
    /// Strategy that actually ran.
    pub strategy: RecoveryStrategy,
    pub new_container_id: Option<ContainerId>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

impl RecoveryResult {
    /// A failed result that never reached a strategy.
    pub fn not_attempted(
        device_id: DeviceId,
        strategy: RecoveryStrategy,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            device_id,
            selected_strategy: strategy,
            strategy,
            new_container_id: None,
            duration_ms: 0,
            error: Some(error.into()),
            attempts: 0,
            completed_at: Utc::now(),
        }
    }

    /// Whether the executor ran a different strategy than the one selected.
    #[must_use]
    pub fn downgraded(&self) -> bool {
        self.selected_strategy != self.strategy
    }
}

/// Outcome of one self-healing action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingResult {
    pub success: bool,
    pub inconsistency: Inconsistency,
    /// What was done, or `failed`.
    pub action: String,
    pub error: Option<String>,
    /// Journal entry for the database write, when one was made and recorded.
    pub operation_id: Option<OperationId>,
}

impl HealingResult {
    pub(crate) fn healed(
        inconsistency: Inconsistency,
        action: impl Into<String>,
        operation_id: Option<OperationId>,
    ) -> Self {
        Self {
            success: true,
            inconsistency,
            action: action.into(),
            error: None,
            operation_id,
        }
    }

    pub(crate) fn failed(inconsistency: Inconsistency, error: impl Into<String>) -> Self {
        Self {
            success: false,
            inconsistency,
            action: "failed".to_string(),
            error: Some(error.into()),
            operation_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_failure_type_wire_names() {
        assert_eq!(FailureType::ContainerDead.as_str(), "container_dead");
        assert_eq!(
            serde_json::to_string(&FailureType::HeartbeatTimeout).unwrap(),
            "\"heartbeat_timeout\""
        );
    }

    #[test]
    fn test_downgrade_is_explicit() {
        let mut result = RecoveryResult::not_attempted(
            DeviceId::new("device-1"),
            RecoveryStrategy::RestoreFromSnapshot,
            "no snapshot",
        );
        assert!(!result.downgraded());

        result.strategy = RecoveryStrategy::Recreate;
        assert!(result.downgraded());
    }

    #[test]
    fn test_inconsistency_builders() {
        let inconsistency = Inconsistency::new(
            InconsistencyType::OrphanedContainer,
            Severity::Medium,
            serde_json::json!({ "inDatabase": true }),
            serde_json::json!({ "inDatabase": false }),
            "orphan",
        )
        .for_container(ContainerId::new("c9"));

        assert!(inconsistency.auto_fixable);
        assert!(inconsistency.device_id.is_none());
        assert_eq!(inconsistency.container_id, Some(ContainerId::new("c9")));
    }
}
