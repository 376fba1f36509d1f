//! Policy API types.
//!
//! The JSON shape follows the policy custom resource: the violation list
//! lives under `status.violations`, and empty fields are omitted so that a
//! merge patch between two policies only mentions what actually changed.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity of a violation inside a policy: one rule failing on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViolationKey {
    pub kind: String,
    pub resource: String,
    pub rule: String,
}

impl ViolationKey {
    /// Create a new violation key.
    pub fn new(
        kind: impl Into<String>,
        resource: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            resource: resource.into(),
            rule: rule.into(),
        }
    }
}

impl fmt::Display for ViolationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.kind, self.resource, self.rule)
    }
}

/// One currently-active rule failure on one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rule: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Violation {
    /// Create a violation for `rule` failing on `kind`/`resource`.
    pub fn new(
        kind: impl Into<String>,
        resource: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self {
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

    /// The (kind, resource, rule) identity of this violation.
    pub fn key(&self) -> ViolationKey {
        ViolationKey::new(&self.kind, &self.resource, &self.rule)
    }

    /// Whether this violation has the given identity.
    pub fn matches(&self, key: &ViolationKey) -> bool {
        self.kind == key.kind && self.resource == key.resource && self.rule == key.rule
    }
}

/// Observed status of a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

/// A managed policy object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    /// Rule definitions. Opaque to the violation machinery.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: PolicyStatus,
}

impl Policy {
    /// Create an empty policy with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the rule definitions.
    #[must_use]
    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    /// Set the violation list.
    #[must_use]
    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        self.status.violations = violations;
        self
    }

    /// The stored violations, in order.
    pub fn violations(&self) -> &[Violation] {
        &self.status.violations
    }

    /// Build a new policy identical to this one except for its violation list.
    ///
    /// `self` is left untouched.
    #[must_use]
    pub fn with_replaced_violations(&self, violations: Vec<Violation>) -> Self {
        Self {
            name: self.name.clone(),
            spec: self.spec.clone(),
            status: PolicyStatus { violations },
        }
    }

    /// Keys appearing more than once in the violation list.
    pub fn duplicate_keys(&self) -> Vec<ViolationKey> {
        self.status
            .violations
            .iter()
            .map(Violation::key)
            .duplicates()
            .collect_vec()
    }

    /// Check the policy invariants.
    ///
    /// # Errors
    ///
    /// Returns `EmptyPolicyName` for a nameless policy and
    /// `DuplicateViolation` for the first key stored twice.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::EmptyPolicyName);
        }
        match self.duplicate_keys().into_iter().next() {
            Some(key) => Err(Error::duplicate_violation(&self.name, key)),
            None => Ok(()),
        }
    }

    /// Serialize to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the spec cannot be represented as JSON.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the value does not have the policy shape.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Opaque version of a stored policy, bumped on every committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    /// Create a version from its raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Version assigned to a freshly created object.
    pub const fn initial() -> Self {
        Self(1)
    }

    /// The version following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A policy together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedPolicy {
    pub policy: Policy,
    pub version: ResourceVersion,
}

impl VersionedPolicy {
    /// Pair a policy with its version.
    pub const fn new(policy: Policy, version: ResourceVersion) -> Self {
        Self { policy, version }
    }

    /// Name of the policy.
    pub fn name(&self) -> &str {
        &self.policy.name
    }
}
