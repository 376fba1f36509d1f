//! Policy store trait and implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use kpolicy_core::{Policy, ResourceVersion, VersionedPolicy};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::patch::MergePatch;

/// Trait for policy storage backends.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Read a policy and the version it is stored at.
    async fn get(&self, name: &str) -> Result<VersionedPolicy>;

    /// Apply a merge patch to the named policy if it is still at `expected`.
    ///
    /// Returns the new version. Fails with `VersionConflict` when the stored
    /// version differs from `expected`.
    async fn apply(
        &self,
        name: &str,
        expected: ResourceVersion,
        patch: &MergePatch,
    ) -> Result<ResourceVersion>;
}

#[async_trait]
impl<S: PolicyStore + ?Sized> PolicyStore for Arc<S> {
    async fn get(&self, name: &str) -> Result<VersionedPolicy> {
        (**self).get(name).await
    }

    async fn apply(
        &self,
        name: &str,
        expected: ResourceVersion,
        patch: &MergePatch,
    ) -> Result<ResourceVersion> {
        (**self).apply(name, expected, patch).await
    }
}

/// In-memory policy store for testing.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<HashMap<String, VersionedPolicy>>,
    writes: AtomicUsize,
}

impl InMemoryPolicyStore {
    /// Create a new in-memory policy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory policy store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Create or replace a policy, bypassing patch validation.
    ///
    /// Replacing bumps the version so that in-flight writers conflict.
    pub async fn insert(&self, policy: Policy) -> ResourceVersion {
        let mut policies = self.policies.write().await;
        let version = policies
            .get(&policy.name)
            .map_or_else(ResourceVersion::initial, |existing| existing.version.next());
        policies.insert(policy.name.clone(), VersionedPolicy::new(policy, version));
        version
    }

    /// Delete a policy. Returns whether it existed.
    pub async fn remove(&self, name: &str) -> bool {
        self.policies.write().await.remove(name).is_some()
    }

    /// Number of patches committed so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get(&self, name: &str) -> Result<VersionedPolicy> {
        self.policies
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::policy_not_found(name))
    }

    async fn apply(
        &self,
        name: &str,
        expected: ResourceVersion,
        patch: &MergePatch,
    ) -> Result<ResourceVersion> {
        let mut policies = self.policies.write().await;

        let current = policies
            .get(name)
            .ok_or_else(|| Error::apply_rejected(name, "policy no longer exists"))?;

        if current.version != expected {
            return Err(Error::version_conflict(name, expected, current.version));
        }

        let base = current.policy.to_value()?;
        let patched = Policy::from_value(patch.apply_to(&base))
            .map_err(|e| Error::apply_rejected(name, format!("malformed patch: {e}")))?;

        if patched.name != name {
            return Err(Error::apply_rejected(name, "patch renames the policy"));
        }
        patched
            .validate()
            .map_err(|e| Error::apply_rejected(name, e.to_string()))?;

        let version = current.version.next();
        policies.insert(name.to_string(), VersionedPolicy::new(patched, version));
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(version)
    }
}

/// A wrapper that adds tracing to a policy store.
pub struct TracingPolicyStore<S: PolicyStore> {
    inner: S,
}

impl<S: PolicyStore> TracingPolicyStore<S> {
    /// Create a new tracing policy store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: PolicyStore> PolicyStore for TracingPolicyStore<S> {
    async fn get(&self, name: &str) -> Result<VersionedPolicy> {
        tracing::debug!(policy = name, "Fetching policy");
        let result = self.inner.get(name).await;
        match &result {
            Ok(found) => tracing::trace!(
                policy = name,
                version = %found.version,
                violations = found.policy.violations().len(),
                "Policy fetched"
            ),
            Err(e) => tracing::debug!(policy = name, error = %e, "Policy fetch failed"),
        }
        result
    }

    async fn apply(
        &self,
        name: &str,
        expected: ResourceVersion,
        patch: &MergePatch,
    ) -> Result<ResourceVersion> {
        tracing::debug!(policy = name, expected = %expected, patch = %patch, "Applying patch");
        let result = self.inner.apply(name, expected, patch).await;
        match &result {
            Ok(version) => tracing::trace!(policy = name, version = %version, "Patch applied"),
            Err(e) => tracing::debug!(policy = name, error = %e, "Patch not applied"),
        }
        result
    }
}
