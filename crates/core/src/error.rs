//! Core error types for policy objects.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use thiserror::Error;

use crate::types::ViolationKey;

/// Result type alias for core policy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for policy objects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("policy name must not be empty")]
    EmptyPolicyName,

    #[error("policy '{policy}' holds more than one violation for {key}")]
    DuplicateViolation { policy: String, key: ViolationKey },

    #[error("JSON serialization error: {reason}")]
    Serialization { reason: String },
}

impl Error {
    /// Create a duplicate violation error.
    pub fn duplicate_violation(policy: impl Into<String>, key: ViolationKey) -> Self {
        Self::DuplicateViolation {
            policy: policy.into(),
            key,
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
