//! Fleet outcome events.
//!
//! These are the notifications the reconciliation engine broadcasts after it
//! acts on a device. Failure types and strategies travel as their stable
//! string names so this crate does not depend on the engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use warden_core::DeviceId;

/// Unique identifier for a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events published by the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FleetEvent {
    /// A recovery attempt brought the device back.
    RecoverySucceeded {
        event_id: EventId,
        device_id: DeviceId,
        failure_type: String,
        strategy: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A recovery attempt finished without restoring the device.
    RecoveryFailed {
        event_id: EventId,
        device_id: DeviceId,
        failure_type: String,
        strategy: String,
        error: Option<String>,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// Automatic recovery was abandoned for the device.
    PermanentFailure {
        event_id: EventId,
        device_id: DeviceId,
        consecutive_failures: usize,
        timestamp: DateTime<Utc>,
    },
    /// An inconsistency was repaired.
    SelfHealingSucceeded {
        event_id: EventId,
        inconsistency: String,
        device_id: Option<DeviceId>,
        action: String,
        timestamp: DateTime<Utc>,
    },
    /// Repairing an inconsistency failed.
    SelfHealingFailed {
        event_id: EventId,
        inconsistency: String,
        device_id: Option<DeviceId>,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A consistency check found divergences.
    InconsistenciesDetected {
        event_id: EventId,
        count: usize,
        by_type: BTreeMap<String, usize>,
        timestamp: DateTime<Utc>,
    },
    /// A journaled operation was rolled back.
    RollbackSucceeded {
        event_id: EventId,
        operation_id: String,
        operation_type: String,
        entity_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl FleetEvent {
    /// Create a `RecoverySucceeded` event.
    pub fn recovery_succeeded(
        device_id: DeviceId,
        failure_type: impl Into<String>,
        strategy: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self::RecoverySucceeded {
            event_id: EventId::new(),
            device_id,
            failure_type: failure_type.into(),
            strategy: strategy.into(),
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    /// Create a `RecoveryFailed` event.
    pub fn recovery_failed(
        device_id: DeviceId,
        failure_type: impl Into<String>,
        strategy: impl Into<String>,
        error: Option<String>,
        attempts: u32,
    ) -> Self {
        Self::RecoveryFailed {
            event_id: EventId::new(),
            device_id,
            failure_type: failure_type.into(),
            strategy: strategy.into(),
            error,
            attempts,
            timestamp: Utc::now(),
        }
    }

    /// Create a `PermanentFailure` event.
    #[must_use]
    pub fn permanent_failure(device_id: DeviceId, consecutive_failures: usize) -> Self {
        Self::PermanentFailure {
            event_id: EventId::new(),
            device_id,
            consecutive_failures,
            timestamp: Utc::now(),
        }
    }

    /// Create a `SelfHealingSucceeded` event.
    pub fn self_healing_succeeded(
        inconsistency: impl Into<String>,
        device_id: Option<DeviceId>,
        action: impl Into<String>,
    ) -> Self {
        Self::SelfHealingSucceeded {
            event_id: EventId::new(),
            inconsistency: inconsistency.into(),
            device_id,
            action: action.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a `SelfHealingFailed` event.
    pub fn self_healing_failed(
        inconsistency: impl Into<String>,
        device_id: Option<DeviceId>,
        error: impl Into<String>,
    ) -> Self {
        Self::SelfHealingFailed {
            event_id: EventId::new(),
            inconsistency: inconsistency.into(),
            device_id,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an `InconsistenciesDetected` event.
    #[must_use]
    pub fn inconsistencies_detected(count: usize, by_type: BTreeMap<String, usize>) -> Self {
        Self::InconsistenciesDetected {
            event_id: EventId::new(),
            count,
            by_type,
            timestamp: Utc::now(),
        }
    }

    /// Create a `RollbackSucceeded` event.
    pub fn rollback_succeeded(
        operation_id: impl Into<String>,
        operation_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self::RollbackSucceeded {
            event_id: EventId::new(),
            operation_id: operation_id.into(),
            operation_type: operation_type.into(),
            entity_id: entity_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get the event ID.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::RecoverySucceeded { event_id, .. }
            | Self::RecoveryFailed { event_id, .. }
            | Self::PermanentFailure { event_id, .. }
            | Self::SelfHealingSucceeded { event_id, .. }
            | Self::SelfHealingFailed { event_id, .. }
            | Self::InconsistenciesDetected { event_id, .. }
            | Self::RollbackSucceeded { event_id, .. } => *event_id,
        }
    }

    /// Get the device the event concerns, if any.
    #[must_use]
    pub const fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::RecoverySucceeded { device_id, .. }
            | Self::RecoveryFailed { device_id, .. }
            | Self::PermanentFailure { device_id, .. } => Some(device_id),
            Self::SelfHealingSucceeded { device_id, .. }
            | Self::SelfHealingFailed { device_id, .. } => device_id.as_ref(),
            Self::InconsistenciesDetected { .. } | Self::RollbackSucceeded { .. } => None,
        }
    }

    /// Whether the event reports something the engine could not fix.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::RecoveryFailed { .. }
                | Self::PermanentFailure { .. }
                | Self::SelfHealingFailed { .. }
        )
    }

    /// Get the wire name of the event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::RecoverySucceeded { .. } => "recovery_success",
            Self::RecoveryFailed { .. } => "recovery_failed",
            Self::PermanentFailure { .. } => "permanent_failure",
            Self::SelfHealingSucceeded { .. } => "self_healing_success",
            Self::SelfHealingFailed { .. } => "self_healing_failed",
            Self::InconsistenciesDetected { .. } => "inconsistencies_detected",
            Self::RollbackSucceeded { .. } => "rollback_success",
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn test_recovery_succeeded_event() {
        let event = FleetEvent::recovery_succeeded(
            DeviceId::new("device-1"),
            "container_dead",
            "recreate",
            1200,
        );

        assert_eq!(event.event_type(), "recovery_success");
        assert_eq!(event.device_id(), Some(&DeviceId::new("device-1")));
        assert!(!event.is_failure());
    }

    #[test]
    fn test_failure_events() {
        let device = DeviceId::new("device-1");

        assert!(FleetEvent::permanent_failure(device.clone(), 3).is_failure());
        assert!(FleetEvent::recovery_failed(device, "container_dead", "recreate", None, 3)
            .is_failure());
        assert!(FleetEvent::self_healing_failed("status_mismatch", None, "timeout").is_failure());
        assert!(!FleetEvent::rollback_succeeded("op", "update", "device-1").is_failure());
    }

    #[test]
    fn test_orphan_healing_has_no_device() {
        let event = FleetEvent::self_healing_succeeded(
            "orphaned_container",
            None,
            "Removed orphaned container c9",
        );

        assert_eq!(event.event_type(), "self_healing_success");
        assert!(event.device_id().is_none());
    }

    #[test]
    fn test_inconsistencies_detected_carries_breakdown() {
        let mut by_type = BTreeMap::new();
        by_type.insert("status_mismatch".to_string(), 2);
        let event = FleetEvent::inconsistencies_detected(2, by_type);

        assert_eq!(event.event_type(), "inconsistencies_detected");
        match event {
            FleetEvent::InconsistenciesDetected { count, by_type, .. } => {
                assert_eq!(count, 2);
                assert_eq!(by_type.get("status_mismatch"), Some(&2));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_event_serializes_with_variant_tag() {
        let event = FleetEvent::permanent_failure(DeviceId::new("device-7"), 3);

        let json = serde_json::to_value(&event);
        assert!(json.is_ok());
        let json = json.unwrap_or_default();
        assert_eq!(json["PermanentFailure"]["device_id"], "device-7");
        assert_eq!(json["PermanentFailure"]["consecutive_failures"], 3);
    }
}
