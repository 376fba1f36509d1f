//! JSON merge patches (RFC 7396) and the patch computer.
//!
//! A merge patch mentions only what changed: absent keys are left alone,
//! present keys overwrite, and `null` deletes. Arrays are replaced as a
//! whole, so a patch touching the violation list always carries the full
//! new list. That is why commits are conditioned on the version read.

use std::fmt;
use std::sync::Arc;

use kpolicy_core::{Policy, ResourceVersion, VersionedPolicy};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::store::PolicyStore;

/// A merge patch document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePatch(Value);

impl MergePatch {
    /// The patch that changes nothing.
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Wrap an existing patch document.
    pub const fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Compute the patch that turns `original` into `modified`.
    pub fn diff(original: &Value, modified: &Value) -> Self {
        Self(diff_values(original, modified).unwrap_or_else(|| Value::Object(Map::new())))
    }

    /// Whether applying this patch leaves every document unchanged.
    pub fn is_empty(&self) -> bool {
        self.0.as_object().is_some_and(Map::is_empty)
    }

    /// The patch document.
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Apply this patch to `target`, returning the patched document.
    pub fn apply_to(&self, target: &Value) -> Value {
        let mut patched = target.clone();
        json_patch::merge(&mut patched, &self.0);
        patched
    }
}

impl fmt::Display for MergePatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `None` means the two values are equal.
fn diff_values(original: &Value, modified: &Value) -> Option<Value> {
    match (original, modified) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for key in before.keys().filter(|k| !after.contains_key(*k)) {
                patch.insert(key.clone(), Value::Null);
            }
            for (key, value) in after {
                match before.get(key) {
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                    Some(previous) => {
                        if let Some(change) = diff_values(previous, value) {
                            patch.insert(key.clone(), change);
                        }
                    }
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ if original == modified => None,
        _ => Some(modified.clone()),
    }
}

/// What a call to [`PatchComputer::apply_diff`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The policies serialized identically; nothing was sent.
    Unchanged,
    /// The patch was committed at the given version.
    Applied(ResourceVersion),
}

/// Diffs policy snapshots and submits the result to a [`PolicyStore`].
#[derive(Clone)]
pub struct PatchComputer {
    store: Arc<dyn PolicyStore>,
}

impl PatchComputer {
    /// Create a patch computer writing to `store`.
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    /// Compute the merge patch from `original` to `modified`.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if either policy cannot be serialized.
    pub fn compute(original: &Policy, modified: &Policy) -> Result<MergePatch> {
        let before = original.to_value()?;
        let after = modified.to_value()?;
        Ok(MergePatch::diff(&before, &after))
    }

    /// Submit the diff between `original` and `modified` against
    /// `original`'s name, conditioned on `original`'s version.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the diff cannot be computed and propagates
    /// the store's error (`VersionConflict`, `ApplyRejected`, ...) unchanged.
    pub async fn apply_diff(
        &self,
        original: &VersionedPolicy,
        modified: &Policy,
    ) -> Result<PatchOutcome> {
        let patch = Self::compute(&original.policy, modified)?;
        if patch.is_empty() {
            debug!(policy = original.name(), "No changes to commit");
            return Ok(PatchOutcome::Unchanged);
        }

        debug!(
            policy = original.name(),
            version = %original.version,
            patch = %patch,
            "Submitting merge patch"
        );
        let version = self
            .store
            .apply(original.name(), original.version, &patch)
            .await?;
        Ok(PatchOutcome::Applied(version))
    }
}
