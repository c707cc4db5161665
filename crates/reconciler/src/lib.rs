//! Device state reconciliation and failover.
//!
//! Keeps a fleet of containerized cloud phones in line with their database
//! records. Two cycles run side by side:
//!
//! - **Failover**: classify failures from heartbeats, the container runtime
//!   and device error flags, gate them through cooldown and a
//!   consecutive-failure ceiling, then restart, restore or recreate.
//! - **Consistency**: detect status mismatches, missing containers and
//!   orphaned containers, and heal them.
//!
//! Every device write goes through the [`OperationJournal`], so corrections
//! can be rolled back.
//!
//! # Key Concepts
//!
//! ## Collaborators
//!
//! The engine owns no storage or runtime client. It is wired against the
//! traits in [`ports`]; [`memory`] provides in-process implementations.
//!
//! ## Outcomes, not errors
//!
//! Recovery and healing never fail with `Err`. They return
//! [`RecoveryResult`] and [`HealingResult`] so a cycle can continue past a
//! broken device.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_events::EventLog;
//! use warden_reconciler::memory::*;
//! use warden_reconciler::{Collaborators, FailoverService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let collaborators = Collaborators {
//!         repository: Arc::new(InMemoryDeviceRepository::new()),
//!         runtime: Arc::new(InMemoryContainerRuntime::new()),
//!         snapshots: Arc::new(InMemorySnapshotStore::new()),
//!         ports: Arc::new(InMemoryPortAllocator::new(40_000)),
//!         events: Arc::new(EventLog::new()),
//!     };
//!
//!     let failover = FailoverService::builder(collaborators).build().unwrap();
//!     let report = failover.run_cycle().await;
//!     println!("{report:?}");
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod classifier;
pub mod consistency;
pub mod detector;
pub mod error;
pub mod executor;
pub mod failover;
pub mod governance;
pub mod healer;
pub mod journal;
pub mod memory;
pub mod model;
pub mod ports;
pub mod records;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod strategy;

// Re-export main types
pub use classifier::FailureClassifier;
pub use consistency::{ConsistencyCycleReport, ConsistencyService, INCONSISTENCY_HISTORY_CAP};
pub use detector::InconsistencyDetector;
pub use error::{Error, Result, RollbackError};
pub use executor::RecoveryExecutor;
pub use failover::{FailoverCycleReport, FailoverService, FailoverServiceBuilder};
pub use governance::{
    GovernanceOutcome, GovernanceStore, GovernanceTracker, InMemoryGovernanceStore, SkipReason,
    FAILURE_HISTORY_CAP, MIGRATION_HISTORY_CAP,
};
pub use healer::SelfHealer;
pub use journal::{
    NewOperation, OperationId, OperationJournal, OperationRecord, OperationType, RollbackReceipt,
    DEVICE_ENTITY,
};
pub use model::{
    Failure, FailureType, HealingResult, Inconsistency, InconsistencyType, RecoveryResult,
    RecoveryStrategy,
};
pub use ports::{
    Collaborators, ContainerInspection, ContainerRuntime, ContainerSpec, DeviceRepository,
    DistributedLock, EntityWrite, ManagedContainer, PortAllocator, PortPair, RestoreOptions,
    SnapshotRef, SnapshotStore,
};
pub use records::{FailoverRecord, FailoverRecordQuery, Page, RecordKind, RecordStatus};
pub use retry::{with_retry, RetryOutcome, RetryPolicy};
pub use scheduler::{CycleOutcome, ReconciliationScheduler, SchedulerHandle};
pub use stats::{ConsistencyStatistics, FailoverStatistics};
pub use strategy::select_strategy;
