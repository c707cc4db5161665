//! Recovery strategy selection.

use warden_core::{DeviceSnapshot, FailoverConfig};

use crate::model::{Failure, FailureType, RecoveryStrategy};

/// Pick the recovery strategy for a failure. First match wins:
///
/// 1. an unhealthy container is restarted in place,
/// 2. with snapshot recovery enabled the device is restored from its latest
///    snapshot (the executor downgrades to recreate if none is ready),
/// 3. otherwise the container is recreated.
#[must_use]
pub fn select_strategy(
    failure: &Failure,
    _device: &DeviceSnapshot,
    config: &FailoverConfig,
) -> RecoveryStrategy {
    if failure.failure_type == FailureType::ContainerUnhealthy {
        return RecoveryStrategy::RestartContainer;
    }

    if config.snapshot_recovery_enabled {
        return RecoveryStrategy::RestoreFromSnapshot;
    }

    RecoveryStrategy::Recreate
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use warden_core::{DeviceId, Severity};

    use super::*;

    fn failure(failure_type: FailureType) -> Failure {
        Failure::new(DeviceId::new("device-1"), failure_type, Severity::High, "test")
    }

    fn device() -> DeviceSnapshot {
        DeviceSnapshot::new("device-1", "phone-1")
    }

    #[test]
    fn test_unhealthy_restarts_regardless_of_config() {
        let mut config = FailoverConfig::default();
        for snapshots in [true, false] {
            config.snapshot_recovery_enabled = snapshots;
            assert_eq!(
                select_strategy(&failure(FailureType::ContainerUnhealthy), &device(), &config),
                RecoveryStrategy::RestartContainer
            );
        }
    }

    #[test]
    fn test_snapshot_recovery_preferred_when_enabled() {
        let config = FailoverConfig {
            snapshot_recovery_enabled: true,
            ..FailoverConfig::default()
        };

        assert_eq!(
            select_strategy(&failure(FailureType::ContainerDead), &device(), &config),
            RecoveryStrategy::RestoreFromSnapshot
        );
    }

    fn non_unhealthy() -> impl Strategy<Value = FailureType> {
        prop_oneof![
            Just(FailureType::HeartbeatTimeout),
            Just(FailureType::ContainerDead),
            Just(FailureType::HighErrorRate),
            Just(FailureType::ResourceExhausted),
        ]
    }

    proptest! {
        #[test]
        fn prop_recreate_when_snapshots_disabled(failure_type in non_unhealthy()) {
            let config = FailoverConfig {
                snapshot_recovery_enabled: false,
                ..FailoverConfig::default()
            };

            prop_assert_eq!(
                select_strategy(&failure(failure_type), &device(), &config),
                RecoveryStrategy::Recreate
            );
        }
    }
}
