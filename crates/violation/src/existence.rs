//! Resource existence lookups.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Answers whether a cluster resource currently exists.
///
/// Implementations backed by a lookup that reports `ResourceNotFound`
/// should map that to `Ok(false)`; any other error means the answer is
/// unknown.
#[async_trait]
pub trait ResourceExistence: Send + Sync {
    /// Whether `kind`/`resource` exists.
    async fn exists(&self, kind: &str, resource: &str) -> Result<bool>;
}

#[async_trait]
impl<R: ResourceExistence + ?Sized> ResourceExistence for Arc<R> {
    async fn exists(&self, kind: &str, resource: &str) -> Result<bool> {
        (**self).exists(kind, resource).await
    }
}

/// Turn the result of a resource fetch into an existence answer.
///
/// # Errors
///
/// Propagates every error except `ResourceNotFound`.
pub fn exists_from_lookup<T>(lookup: Result<T>) -> Result<bool> {
    match lookup {
        Ok(_) => Ok(true),
        Err(Error::ResourceNotFound { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

type ResourceRef = (String, String);

/// In-memory set of live resources for testing.
///
/// Resources registered with [`fail_on`](Self::fail_on) answer with a
/// transient error instead of a verdict.
#[derive(Default)]
pub struct InMemoryResources {
    live: RwLock<HashSet<ResourceRef>>,
    failing: RwLock<HashSet<ResourceRef>>,
}

impl InMemoryResources {
    /// Create an empty resource set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty resource set wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Mark a resource as existing.
    pub async fn add(&self, kind: impl Into<String>, resource: impl Into<String>) {
        self.live.write().await.insert((kind.into(), resource.into()));
    }

    /// Mark a resource as deleted.
    pub async fn delete(&self, kind: &str, resource: &str) {
        self.live
            .write()
            .await
            .remove(&(kind.to_string(), resource.to_string()));
    }

    /// Make lookups of a resource fail.
    pub async fn fail_on(&self, kind: impl Into<String>, resource: impl Into<String>) {
        self.failing
            .write()
            .await
            .insert((kind.into(), resource.into()));
    }

    /// Let lookups of every resource succeed again.
    pub async fn heal(&self) {
        self.failing.write().await.clear();
    }
}

#[async_trait]
impl ResourceExistence for InMemoryResources {
    async fn exists(&self, kind: &str, resource: &str) -> Result<bool> {
        let key = (kind.to_string(), resource.to_string());
        if self.failing.read().await.contains(&key) {
            return Err(Error::transient(
                "resource lookup",
                format!("{kind}/{resource} unavailable"),
            ));
        }
        Ok(self.live.read().await.contains(&key))
    }
}
