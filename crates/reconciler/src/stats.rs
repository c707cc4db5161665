//! Statistics over governance and consistency history.
//!
//! Breakdowns are keyed by the closed enums and start with every variant at
//! zero, so an empty history still reports a complete shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::journal::OperationRecord;
use crate::model::{
    Failure, FailureType, Inconsistency, InconsistencyType, RecoveryResult, RecoveryStrategy,
};

/// Window for "recent" inconsistencies.
const RECENT_WINDOW_HOURS: i64 = 1;

/// Failover counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverStatistics {
    pub total_failures: usize,
    /// Devices with a non-empty failure history.
    pub active_failures: usize,
    pub total_migrations: usize,
    pub successful_migrations: usize,
    pub failed_migrations: usize,
    /// Mean duration over every retained migration, in milliseconds.
    pub average_recovery_time_ms: u64,
    pub failures_by_type: BTreeMap<FailureType, usize>,
    pub migrations_by_strategy: BTreeMap<RecoveryStrategy, usize>,
}

impl FailoverStatistics {
    #[must_use]
    pub fn compute(
        failures: &[Failure],
        active_failures: usize,
        migrations: &[RecoveryResult],
    ) -> Self {
        let successful_migrations = migrations.iter().filter(|m| m.success).count();

        let average_recovery_time_ms = if migrations.is_empty() {
            0
        } else {
            let total: u64 = migrations.iter().map(|m| m.duration_ms).sum();
            total / u64::try_from(migrations.len()).unwrap_or(u64::MAX)
        };

        let mut failures_by_type = zeroed(FailureType::ALL);
        for (failure_type, count) in failures.iter().map(|f| f.failure_type).counts() {
            failures_by_type.insert(failure_type, count);
        }

        let mut migrations_by_strategy = zeroed(RecoveryStrategy::ALL);
        for (strategy, count) in migrations.iter().map(|m| m.strategy).counts() {
            migrations_by_strategy.insert(strategy, count);
        }

        Self {
            total_failures: failures.len(),
            active_failures,
            total_migrations: migrations.len(),
            successful_migrations,
            failed_migrations: migrations.len() - successful_migrations,
            average_recovery_time_ms,
            failures_by_type,
            migrations_by_strategy,
        }
    }
}

/// Consistency counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyStatistics {
    pub total_inconsistencies: usize,
    pub inconsistencies_by_type: BTreeMap<InconsistencyType, usize>,
    pub total_operations: usize,
    pub rollbackable_operations: usize,
    pub rolled_back_operations: usize,
    /// Inconsistencies detected within the last hour.
    pub recent_inconsistencies: usize,
}

impl ConsistencyStatistics {
    #[must_use]
    pub fn compute(
        inconsistencies: &[Inconsistency],
        operations: &[OperationRecord],
        now: DateTime<Utc>,
    ) -> Self {
        let mut inconsistencies_by_type = zeroed(InconsistencyType::ALL);
        for (kind, count) in inconsistencies.iter().map(|i| i.kind).counts() {
            inconsistencies_by_type.insert(kind, count);
        }

        let recent_since = now - Duration::hours(RECENT_WINDOW_HOURS);

        Self {
            total_inconsistencies: inconsistencies.len(),
            inconsistencies_by_type,
            total_operations: operations.len(),
            rollbackable_operations: operations.iter().filter(|op| op.rollbackable).count(),
            rolled_back_operations: operations.iter().filter(|op| op.rolled_back).count(),
            recent_inconsistencies: inconsistencies
                .iter()
                .filter(|i| i.timestamp > recent_since)
                .count(),
        }
    }
}

fn zeroed<K: Ord, const N: usize>(keys: [K; N]) -> BTreeMap<K, usize> {
    keys.into_iter().map(|key| (key, 0)).collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;
    use warden_core::{DeviceId, Severity};

    use super::*;

    #[test]
    fn test_empty_history_reports_zeroes() {
        let stats = FailoverStatistics::compute(&[], 0, &[]);

        assert_eq!(stats.total_failures, 0);
        assert_eq!(stats.average_recovery_time_ms, 0);
        assert_eq!(stats.failures_by_type.len(), FailureType::ALL.len());
        assert!(stats.failures_by_type.values().all(|count| *count == 0));
        assert_eq!(stats.migrations_by_strategy.len(), RecoveryStrategy::ALL.len());

        let consistency = ConsistencyStatistics::compute(&[], &[], Utc::now());
        assert_eq!(consistency.inconsistencies_by_type.len(), InconsistencyType::ALL.len());
        assert_eq!(consistency.recent_inconsistencies, 0);
    }

    #[test]
    fn test_failover_breakdowns() {
        let device = DeviceId::new("device-1");
        let failures = vec![
            Failure::new(device.clone(), FailureType::ContainerDead, Severity::Critical, "a"),
            Failure::new(device.clone(), FailureType::ContainerDead, Severity::Critical, "b"),
            Failure::new(device.clone(), FailureType::HeartbeatTimeout, Severity::High, "c"),
        ];
        let mut ok = RecoveryResult::not_attempted(device.clone(), RecoveryStrategy::Recreate, "x");
        ok.success = true;
        ok.error = None;
        ok.duration_ms = 300;
        let mut failed =
            RecoveryResult::not_attempted(device, RecoveryStrategy::RestartContainer, "boom");
        failed.duration_ms = 100;

        let stats = FailoverStatistics::compute(&failures, 1, &[ok, failed]);

        assert_eq!(stats.total_failures, 3);
        assert_eq!(stats.active_failures, 1);
        assert_eq!(stats.successful_migrations, 1);
        assert_eq!(stats.failed_migrations, 1);
        assert_eq!(stats.average_recovery_time_ms, 200);
        assert_eq!(stats.failures_by_type[&FailureType::ContainerDead], 2);
        assert_eq!(stats.failures_by_type[&FailureType::ContainerUnhealthy], 0);
        assert_eq!(stats.migrations_by_strategy[&RecoveryStrategy::Recreate], 1);
    }

    #[test]
    fn test_recent_window() {
        let now = Utc::now();
        let make = |age: Duration| {
            Inconsistency::new(
                InconsistencyType::OrphanedContainer,
                Severity::Medium,
                json!({}),
                json!({}),
                "orphan",
            )
            .at(now - age)
        };

        let stats = ConsistencyStatistics::compute(
            &[make(Duration::minutes(5)), make(Duration::hours(3))],
            &[],
            now,
        );

        assert_eq!(stats.total_inconsistencies, 2);
        assert_eq!(stats.recent_inconsistencies, 1);
        assert_eq!(
            stats.inconsistencies_by_type[&InconsistencyType::OrphanedContainer],
            2
        );
    }

    #[test]
    fn test_statistics_serialize_with_string_keys() {
        let stats = FailoverStatistics::compute(&[], 0, &[]);

        let value = serde_json::to_value(&stats).unwrap();

        assert_eq!(value["failuresByType"]["container_dead"], 0);
        assert_eq!(value["migrationsByStrategy"]["recreate"], 0);
    }
}
