//! Result type definition and extension traits.
//!
//! Reconciliation checks must never abort a whole cycle because one probe
//! failed, so the combinators here log the error and fall back to a value.

use crate::error::Error;

/// The standard Result type for Warden operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logged fallbacks for Results.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self) -> Option<T>;

    /// Get the value or a default, logging the error under `context`.
    fn or_default_logged(self, context: &str, default: T) -> T;

    /// Inspect the error without consuming the Result.
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn into_option_logged(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Operation failed");
                None
            }
        }
    }

    fn or_default_logged(self, context: &str, default: T) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, context, "Operation failed, using fallback");
                default
            }
        }
    }

    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_result_into_option_ok() {
        let result: Result<i32> = Ok(42);
        assert_eq!(result.into_option_logged(), Some(42));
    }

    #[test]
    fn test_result_into_option_err() {
        let result: Result<i32> = Err(Error::lock("redis down"));
        assert_eq!(result.into_option_logged(), None);
    }

    #[test]
    fn test_result_or_default_logged_ok() {
        let result: Result<Vec<u8>> = Ok(vec![1]);
        assert_eq!(result.or_default_logged("probe", Vec::new()), vec![1]);
    }

    #[test]
    fn test_result_or_default_logged_err() {
        let result: Result<Vec<u8>> = Err(Error::runtime("list", "timeout"));
        assert!(result.or_default_logged("probe", Vec::new()).is_empty());
    }

    #[test]
    fn test_result_inspect_error() {
        let result: Result<i32> = Err(Error::snapshot("missing"));
        let mut called = false;
        let _ = result.inspect_error(|_| {
            called = true;
        });
        assert!(called);
    }
}
