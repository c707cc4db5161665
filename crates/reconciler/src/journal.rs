//! Operation journal and rollback.
//!
//! Every device write the engine makes is recorded here with its before and
//! after state. A rollback writes the before state back inside a single
//! repository transaction and flips `rolled_back`, at most once.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use ulid::Ulid;
use warden_core::{DeviceSnapshot, Result};

use crate::error::RollbackError;
use crate::ports::{DeviceRepository, EntityWrite};

/// Entity type of device records.
pub const DEVICE_ENTITY: &str = "device";

/// Default cap on retained operations.
pub const DEFAULT_MAX_OPERATIONS: usize = 1000;

/// Unique identifier for a journaled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Ulid);

impl OperationId {
    /// Create a new random operation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = RollbackError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|_| RollbackError::not_found(s))
    }
}

/// Kind of mutation recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    /// Stable wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation to be recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
    pub operation_type: OperationType,
    pub entity_type: String,
    pub entity_id: String,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub executed_by: String,
    pub rollbackable: bool,
}

impl NewOperation {
    /// Describe an operation with no captured state. It can only be rolled
    /// back once a before state is attached.
    pub fn new(
        operation_type: OperationType,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        executed_by: impl Into<String>,
    ) -> Self {
        Self {
            operation_type,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            before_state: None,
            after_state: None,
            executed_by: executed_by.into(),
            rollbackable: true,
        }
    }

    /// Capture the pre-mutation state.
    #[must_use]
    pub fn with_before(mut self, state: Value) -> Self {
        self.before_state = Some(state);
        self
    }

    /// Capture the post-mutation state.
    #[must_use]
    pub fn with_after(mut self, state: Value) -> Self {
        self.after_state = Some(state);
        self
    }

    /// Set whether the operation may be rolled back.
    #[must_use]
    pub const fn rollbackable(mut self, rollbackable: bool) -> Self {
        self.rollbackable = rollbackable;
        self
    }
}

/// A recorded operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub operation_type: OperationType,
    pub entity_type: String,
    pub entity_id: String,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub executed_by: String,
    pub timestamp: DateTime<Utc>,
    pub rollbackable: bool,
    pub rolled_back: bool,
}

/// Proof of a completed rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReceipt {
    pub operation_id: OperationId,
    pub operation_type: OperationType,
    pub entity_id: String,
    pub rolled_back_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct JournalSettings {
    enabled: bool,
    max_operations: usize,
}

/// Capped ring buffer of operations with transactional rollback.
pub struct OperationJournal {
    repository: Arc<dyn DeviceRepository>,
    entries: RwLock<VecDeque<OperationRecord>>,
    settings: RwLock<JournalSettings>,
}

impl OperationJournal {
    /// Create an enabled journal with the default cap.
    pub fn new(repository: Arc<dyn DeviceRepository>) -> Self {
        Self::with_settings(repository, true, DEFAULT_MAX_OPERATIONS)
    }

    /// Create a journal with explicit settings.
    pub fn with_settings(
        repository: Arc<dyn DeviceRepository>,
        enabled: bool,
        max_operations: usize,
    ) -> Self {
        Self {
            repository,
            entries: RwLock::new(VecDeque::new()),
            settings: RwLock::new(JournalSettings {
                enabled,
                max_operations: max_operations.max(1),
            }),
        }
    }

    /// Change recording and retention. Shrinking the cap evicts oldest entries.
    pub async fn configure(&self, enabled: bool, max_operations: usize) {
        let max_operations = max_operations.max(1);
        *self.settings.write().await = JournalSettings {
            enabled,
            max_operations,
        };

        let mut entries = self.entries.write().await;
        while entries.len() > max_operations {
            entries.pop_front();
        }
    }

    /// Record an operation. Returns `None` when recording is disabled.
    pub async fn record(&self, operation: NewOperation) -> Option<OperationId> {
        let settings = *self.settings.read().await;
        if !settings.enabled {
            return None;
        }

        let record = OperationRecord {
            id: OperationId::new(),
            operation_type: operation.operation_type,
            entity_type: operation.entity_type,
            entity_id: operation.entity_id,
            before_state: operation.before_state,
            after_state: operation.after_state,
            executed_by: operation.executed_by,
            timestamp: Utc::now(),
            rollbackable: operation.rollbackable,
            rolled_back: false,
        };
        let id = record.id;

        debug!(
            operation_id = %id,
            operation_type = %record.operation_type,
            entity_type = %record.entity_type,
            entity_id = %record.entity_id,
            "Recorded operation"
        );

        let mut entries = self.entries.write().await;
        entries.push_back(record);
        while entries.len() > settings.max_operations {
            entries.pop_front();
        }

        Some(id)
    }

    /// Persist `after`, then record the update.
    ///
    /// Nothing is recorded when the save fails.
    ///
    /// # Errors
    ///
    /// Returns an error if either state cannot be encoded or the save fails.
    pub async fn journaled_update(
        &self,
        before: &DeviceSnapshot,
        after: &DeviceSnapshot,
        executed_by: &str,
        rollbackable: bool,
    ) -> Result<Option<OperationId>> {
        let operation = NewOperation::new(
            OperationType::Update,
            DEVICE_ENTITY,
            before.id.as_str(),
            executed_by,
        )
        .with_before(before.to_value()?)
        .with_after(after.to_value()?)
        .rollbackable(rollbackable);

        self.repository.save(after).await?;
        Ok(self.record(operation).await)
    }

    /// Roll back an operation by writing its before state back.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `AlreadyRolledBack` or `NotRollbackable` when the
    /// journal refuses (a record without a before state is not rollbackable), `UnsupportedEntity`/`UnsupportedOperation` for records
    /// it cannot reverse, and `Transaction` when the write fails. Only a
    /// successful transaction marks the record rolled back.
    pub async fn rollback(
        &self,
        operation_id: &OperationId,
    ) -> std::result::Result<RollbackReceipt, RollbackError> {
        // Held across the transaction so two callers cannot both apply it.
        let mut entries = self.entries.write().await;

        let record = entries
            .iter_mut()
            .find(|op| op.id == *operation_id)
            .ok_or_else(|| RollbackError::not_found(operation_id.to_string()))?;

        if record.rolled_back {
            return Err(RollbackError::already_rolled_back(operation_id.to_string()));
        }
        if !record.rollbackable || record.before_state.is_none() {
            return Err(RollbackError::not_rollbackable(operation_id.to_string()));
        }

        info!(operation_id = %operation_id, entity_id = %record.entity_id, "Rolling back operation");

        let writes = rollback_writes(record)?;
        if let Err(e) = self.repository.apply_in_transaction(writes).await {
            warn!(operation_id = %operation_id, error = %e, "Rollback transaction failed");
            return Err(RollbackError::transaction(e.to_string()));
        }

        record.rolled_back = true;

        Ok(RollbackReceipt {
            operation_id: *operation_id,
            operation_type: record.operation_type,
            entity_id: record.entity_id.clone(),
            rolled_back_at: Utc::now(),
        })
    }

    /// Retained operations, oldest first, optionally for one entity.
    pub async fn history(&self, entity_id: Option<&str>) -> Vec<OperationRecord> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|op| entity_id.map_or(true, |id| op.entity_id == id))
            .cloned()
            .collect()
    }

    /// Number of retained operations.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no operations are retained.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn rollback_writes(
    record: &OperationRecord,
) -> std::result::Result<Vec<EntityWrite>, RollbackError> {
    if record.entity_type != DEVICE_ENTITY {
        return Err(RollbackError::unsupported_entity(&record.entity_type));
    }

    let before = record
        .before_state
        .clone()
        .ok_or_else(|| RollbackError::not_rollbackable(record.id.to_string()))?;

    match record.operation_type {
        OperationType::Update => Ok(vec![EntityWrite::Patch {
            device_id: record.entity_id.as_str().into(),
            fields: before,
        }]),
        OperationType::Delete => {
            let device = DeviceSnapshot::from_value(with_entity_id(before, &record.entity_id))
                .map_err(|e| RollbackError::transaction(e.to_string()))?;
            Ok(vec![EntityWrite::Insert(device)])
        }
        OperationType::Create => Err(RollbackError::unsupported_operation(
            record.operation_type.as_str(),
        )),
    }
}

fn with_entity_id(state: Value, entity_id: &str) -> Value {
    match state {
        Value::Object(mut fields) => {
            fields.insert("id".to_string(), Value::String(entity_id.to_string()));
            Value::Object(fields)
        }
        other => other,
    }
}
