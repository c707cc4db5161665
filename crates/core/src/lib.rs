//! Core types, errors, and configuration for Warden.
//!
//! Warden keeps a fleet of containerized cloud phones consistent with their
//! database records. This crate holds what every other crate agrees on: the
//! device projection, the error taxonomy, and the layered configuration.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use config::{
    FailoverConfig, FailoverConfigUpdate, ReconciliationConfig, ReconciliationConfigUpdate,
    SchedulerConfig, WardenConfig,
};
pub use error::Error;
pub use result::{Result, ResultExt};
pub use types::{
    ContainerId, DeviceId, DeviceSnapshot, DeviceStatus, ResourceSpec, Severity,
    META_LAST_ERROR, META_LAST_ERROR_AT, META_PERMANENT_FAILURE,
};
