//! Paginated failover records.
//!
//! Merges migration and failure history into one newest-first list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::{DeviceId, Severity};

use crate::model::{Failure, FailureType, RecoveryResult, RecoveryStrategy};

/// Default page size.
pub const DEFAULT_PAGE_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Migration,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Failed,
    Detected,
}

/// One row of the merged view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverRecord {
    pub id: String,
    pub kind: RecordKind,
    pub device_id: DeviceId,
    pub status: RecordStatus,
    pub timestamp: DateTime<Utc>,
    pub strategy: Option<RecoveryStrategy>,
    pub failure_type: Option<FailureType>,
    pub severity: Option<Severity>,
    pub duration_ms: Option<u64>,
    pub new_container_id: Option<String>,
    pub details: Option<String>,
}

impl FailoverRecord {
    fn from_migration(result: &RecoveryResult) -> Self {
        Self {
            id: format!(
                "migration_{}_{}",
                result.device_id,
                result.completed_at.timestamp_millis()
            ),
            kind: RecordKind::Migration,
            device_id: result.device_id.clone(),
            status: if result.success {
                RecordStatus::Success
            } else {
                RecordStatus::Failed
            },
            timestamp: result.completed_at,
            strategy: Some(result.strategy),
            failure_type: None,
            severity: None,
            duration_ms: Some(result.duration_ms),
            new_container_id: result.new_container_id.as_ref().map(ToString::to_string),
            details: result.error.clone(),
        }
    }

    fn from_failure(failure: &Failure) -> Self {
        Self {
            id: format!(
                "failure_{}_{}",
                failure.device_id,
                failure.timestamp.timestamp_millis()
            ),
            kind: RecordKind::Failure,
            device_id: failure.device_id.clone(),
            status: RecordStatus::Detected,
            timestamp: failure.timestamp,
            strategy: None,
            failure_type: Some(failure.failure_type),
            severity: Some(failure.severity),
            duration_ms: None,
            new_container_id: None,
            details: Some(failure.details.clone()),
        }
    }
}

/// Filter and page selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverRecordQuery {
    pub status: Option<RecordStatus>,
    pub device_id: Option<DeviceId>,
    /// 1-based page number.
    pub page: usize,
    pub limit: usize,
}

impl Default for FailoverRecordQuery {
    fn default() -> Self {
        Self {
            status: None,
            device_id: None,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl FailoverRecordQuery {
    #[must_use]
    pub const fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    #[must_use]
    pub const fn with_page(mut self, page: usize, limit: usize) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    fn matches(&self, record: &FailoverRecord) -> bool {
        self.status.map_or(true, |status| record.status == status)
            && self
                .device_id
                .as_ref()
                .map_or(true, |id| record.device_id == *id)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    /// Matches across all pages.
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

/// Build the merged, filtered, paginated view.
#[must_use]
pub fn failover_records(
    migrations: &[RecoveryResult],
    failures: &[Failure],
    query: &FailoverRecordQuery,
) -> Page<FailoverRecord> {
    let page = query.page.max(1);
    let limit = query.limit.max(1);

    let mut records: Vec<FailoverRecord> = migrations
        .iter()
        .map(FailoverRecord::from_migration)
        .chain(failures.iter().map(FailoverRecord::from_failure))
        .filter(|record| query.matches(record))
        .collect();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let total = records.len();
    let data = records
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();

    Page {
        data,
        total,
        page,
        limit,
    }
}
