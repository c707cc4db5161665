//! Core error types for Warden operations.
//!
//! Every collaborator failure (persistence, container runtime, snapshot
//! service, port allocator, distributed lock) is mapped onto this enum so
//! the engine can classify it without knowing the backend.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for Warden operations.
#[derive(Debug, Error)]
pub enum Error {
    // Lookup errors
    #[error("device '{device_id}' not found")]
    DeviceNotFound { device_id: String },

    #[error("container '{container_id}' not found")]
    ContainerNotFound { container_id: String },

    // Collaborator errors
    #[error("container runtime operation '{operation}' failed: {reason}")]
    Runtime { operation: String, reason: String },

    #[error("snapshot operation failed: {reason}")]
    Snapshot { reason: String },

    #[error("port allocation failed: {reason}")]
    PortAllocation { reason: String },

    #[error("persistence operation '{operation}' failed: {reason}")]
    Persistence { operation: String, reason: String },

    #[error("distributed lock error: {reason}")]
    Lock { reason: String },

    // Precondition errors (never retried)
    #[error("precondition failed: {reason}")]
    Precondition { reason: String },

    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to parse config file '{path}': {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a device not found error.
    pub fn device_not_found(device_id: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            device_id: device_id.into(),
        }
    }

    /// Create a container not found error.
    pub fn container_not_found(container_id: impl Into<String>) -> Self {
        Self::ContainerNotFound {
            container_id: container_id.into(),
        }
    }

    /// Create a container runtime error.
    pub fn runtime(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Runtime {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a snapshot error.
    pub fn snapshot(reason: impl Into<String>) -> Self {
        Self::Snapshot {
            reason: reason.into(),
        }
    }

    /// Create a port allocation error.
    pub fn port_allocation(reason: impl Into<String>) -> Self {
        Self::PortAllocation {
            reason: reason.into(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a distributed lock error.
    pub fn lock(reason: impl Into<String>) -> Self {
        Self::Lock {
            reason: reason.into(),
        }
    }

    /// Create a precondition error.
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a config parse error.
    pub fn config_parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigParse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Whether the error means the target entity does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. } | Self::ContainerNotFound { .. }
        )
    }

    /// Whether the error is a precondition failure that must not be retried.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition { .. })
    }
}
