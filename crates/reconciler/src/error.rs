//! Error types for the reconciler crate.
//!
//! Collaborator failures use [`warden_core::Error`]. Rollback has its own
//! closed set of rejections so callers can branch on them without parsing
//! messages.

pub use warden_core::{Error, Result};

/// Why a journaled operation could not be rolled back.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RollbackError {
    #[error("operation '{operation_id}' not found")]
    NotFound { operation_id: String },

    #[error("operation '{operation_id}' already rolled back")]
    AlreadyRolledBack { operation_id: String },

    #[error("operation '{operation_id}' is not rollbackable")]
    NotRollbackable { operation_id: String },

    #[error("cannot roll back '{operation_type}' operations")]
    UnsupportedOperation { operation_type: String },

    #[error("cannot roll back operations on entity type '{entity_type}'")]
    UnsupportedEntity { entity_type: String },

    #[error("rollback transaction failed: {0}")]
    Transaction(String),
}

impl RollbackError {
    /// Create a not found error.
    pub fn not_found(operation_id: impl Into<String>) -> Self {
        Self::NotFound {
            operation_id: operation_id.into(),
        }
    }

    /// Create an already rolled back error.
    pub fn already_rolled_back(operation_id: impl Into<String>) -> Self {
        Self::AlreadyRolledBack {
            operation_id: operation_id.into(),
        }
    }

    /// Create a not rollbackable error.
    pub fn not_rollbackable(operation_id: impl Into<String>) -> Self {
        Self::NotRollbackable {
            operation_id: operation_id.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported_operation(operation_type: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation_type: operation_type.into(),
        }
    }

    /// Create an unsupported entity error.
    pub fn unsupported_entity(entity_type: impl Into<String>) -> Self {
        Self::UnsupportedEntity {
            entity_type: entity_type.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(reason: impl Into<String>) -> Self {
        Self::Transaction(reason.into())
    }

    /// Whether retrying the rollback may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_error_display() {
        let err = RollbackError::already_rolled_back("01HX");
        assert!(err.to_string().contains("already rolled back"));
        assert!(err.to_string().contains("01HX"));
    }

    #[test]
    fn test_only_transaction_failures_are_retryable() {
        assert!(RollbackError::transaction("connection reset").is_retryable());
        assert!(!RollbackError::not_rollbackable("op").is_retryable());
        assert!(!RollbackError::not_found("op").is_retryable());
    }
}
