//! Error types for the violation reconciler.

use kpolicy_core::ResourceVersion;
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The named policy does not exist in the store.
    #[error("policy '{policy}' not found")]
    PolicyNotFound { policy: String },

    /// The queried resource does not exist.
    #[error("resource '{kind}/{resource}' not found")]
    ResourceNotFound { kind: String, resource: String },

    /// Network or timeout failure against a collaborator.
    #[error("{operation} failed transiently: {reason}")]
    Transient { operation: String, reason: String },

    /// The stored policy changed since it was read.
    #[error("policy '{policy}' changed: expected version {expected}, found {actual}")]
    VersionConflict {
        policy: String,
        expected: ResourceVersion,
        actual: ResourceVersion,
    },

    /// Version conflicts persisted through every retry.
    #[error("policy '{policy}' still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { policy: String, attempts: u32 },

    /// Existence of one or more stored violations could not be determined.
    #[error("existence of {unresolved} resource(s) in policy '{policy}' is unknown: {reason}")]
    ExistenceUnknown {
        policy: String,
        unresolved: usize,
        reason: String,
    },

    /// A policy could not be serialized or a patch could not be computed.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// The store refused the patch for a reason other than a conflict.
    #[error("patch for policy '{policy}' rejected: {reason}")]
    ApplyRejected { policy: String, reason: String },

    /// The violation report is malformed.
    #[error("invalid violation report: {reason}")]
    InvalidInput { reason: String },

    /// A delivered event could not be recorded.
    #[error("event sink error: {reason}")]
    EventSink { reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a policy not found error.
    pub fn policy_not_found(policy: impl Into<String>) -> Self {
        Self::PolicyNotFound {
            policy: policy.into(),
        }
    }

    /// Create a resource not found error.
    pub fn resource_not_found(kind: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            kind: kind.into(),
            resource: resource.into(),
        }
    }

    /// Create a transient error.
    pub fn transient(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a version conflict error.
    pub fn version_conflict(
        policy: impl Into<String>,
        expected: ResourceVersion,
        actual: ResourceVersion,
    ) -> Self {
        Self::VersionConflict {
            policy: policy.into(),
            expected,
            actual,
        }
    }

    /// Create a conflict retries exhausted error.
    pub fn conflict_retries_exhausted(policy: impl Into<String>, attempts: u32) -> Self {
        Self::ConflictRetriesExhausted {
            policy: policy.into(),
            attempts,
        }
    }

    /// Create an existence unknown error.
    pub fn existence_unknown(
        policy: impl Into<String>,
        unresolved: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::ExistenceUnknown {
            policy: policy.into(),
            unresolved,
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create an apply rejected error.
    pub fn apply_rejected(policy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ApplyRejected {
            policy: policy.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create an event sink error.
    pub fn event_sink(reason: impl Into<String>) -> Self {
        Self::EventSink {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether calling `reconcile` again may succeed without outside help.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. }
                | Self::VersionConflict { .. }
                | Self::ConflictRetriesExhausted { .. }
                | Self::ExistenceUnknown { .. }
        )
    }

    /// Whether this error is a version conflict.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<kpolicy_core::Error> for Error {
    fn from(err: kpolicy_core::Error) -> Self {
        match err {
            kpolicy_core::Error::Serialization { reason } => Self::Serialization { reason },
            other => Self::InvalidInput {
                reason: other.to_string(),
            },
        }
    }
}
