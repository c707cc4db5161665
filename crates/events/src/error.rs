//! Error types for the events crate.

use thiserror::Error;

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Event error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("sink rejected '{event_type}' event: {reason}")]
    Rejected {
        event_type: &'static str,
        reason: String,
    },
}

impl Error {
    /// Create a rejected error.
    pub fn rejected(event_type: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            event_type,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_display() {
        let err = Error::rejected("recovery_success", "broker unreachable");
        assert_eq!(
            err.to_string(),
            "sink rejected 'recovery_success' event: broker unreachable"
        );
    }
}
