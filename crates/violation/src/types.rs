//! Core types for the reconciler.

use kpolicy_core::{Violation, ViolationKey};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A freshly observed violation, addressed to the policy that owns the rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationInfo {
    /// Name of the owning policy.
    pub policy: String,
    pub kind: String,
    pub resource: String,
    pub rule: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl ViolationInfo {
    /// Create a report of `rule` failing on `kind`/`resource`.
    pub fn new(
        policy: impl Into<String>,
        kind: impl Into<String>,
        resource: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            policy: policy.into(),
            kind: kind.into(),
            resource: resource.into(),
            rule: rule.into(),
            ..Self::default()
        }
    }

    /// Set the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The (kind, resource, rule) identity this report is about.
    pub fn key(&self) -> ViolationKey {
        ViolationKey::new(&self.kind, &self.resource, &self.rule)
    }

    /// The violation entry this report would be stored as.
    pub fn to_violation(&self) -> Violation {
        Violation::new(&self.kind, &self.resource, &self.rule)
            .with_reason(&self.reason)
            .with_message(&self.message)
    }

    /// Check the report can be addressed to a policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the policy name is blank.
    pub fn validate(&self) -> Result<()> {
        if self.policy.trim().is_empty() {
            return Err(Error::invalid_input("policy name must not be empty"));
        }
        Ok(())
    }
}

/// Notification recorded for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    pub kind: String,
    pub resource: String,
    pub rule: String,
    pub reason: String,
    pub message: String,
}

impl EventInfo {
    /// Notification for a stale violation removed while processing `info`.
    ///
    /// Resource, rule, reason and message are those of the incoming report.
    pub fn removal(kind: impl Into<String>, info: &ViolationInfo) -> Self {
        Self {
            kind: kind.into(),
            resource: info.resource.clone(),
            rule: info.rule.clone(),
            reason: info.reason.clone(),
            message: info.message.clone(),
        }
    }
}

/// How the reported tuple landed in the new violation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TupleChange {
    /// An existing entry had its reason and message overwritten.
    Updated,
    /// No entry matched, so a new one was appended.
    Inserted,
    /// The matching entry's resource is gone, so the tuple was removed.
    Pruned,
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Policy that was reconciled.
    pub policy: String,
    /// Fetch, merge and apply rounds taken (1 unless conflicts occurred).
    pub attempts: u32,
    /// Length of the committed violation list.
    pub violations: usize,
    /// Stale entries removed.
    pub dropped: usize,
    /// Repeated tuples discarded from a corrupt stored list.
    pub duplicates_removed: usize,
    /// What happened to the reported tuple.
    pub change: TupleChange,
    /// Whether a patch was written; `false` when nothing changed.
    pub patched: bool,
}
