//! Shared fixtures for reconciler integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use kpolicy_core::{Policy, ResourceVersion, VersionedPolicy, Violation};
use kpolicy_violation::{
    Error, EventSink, InMemoryEventSink, InMemoryPolicyStore, InMemoryResources, MergePatch,
    PolicyStore, Reconciler, ReconcilerConfig, Result, TracingPolicyStore,
};

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn violation(kind: &str, resource: &str, rule: &str, reason: &str) -> Violation {
    Violation::new(kind, resource, rule)
        .with_reason(reason)
        .with_message(format!("{rule} failed on {resource}"))
}

/// Store that yields to the scheduler after every read, so that joined
/// reconciliations interleave between fetch and apply.
pub struct YieldingStore {
    pub inner: Arc<InMemoryPolicyStore>,
    pub applies: AtomicUsize,
}

impl YieldingStore {
    pub fn new(inner: Arc<InMemoryPolicyStore>) -> Self {
        Self {
            inner,
            applies: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PolicyStore for YieldingStore {
    async fn get(&self, name: &str) -> Result<VersionedPolicy> {
        let found = self.inner.get(name).await;
        tokio::task::yield_now().await;
        found
    }

    async fn apply(
        &self,
        name: &str,
        expected: ResourceVersion,
        patch: &MergePatch,
    ) -> Result<ResourceVersion> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.inner.apply(name, expected, patch).await
    }
}

/// Store whose writes always lose the race.
pub struct AlwaysConflictingStore {
    pub inner: Arc<InMemoryPolicyStore>,
    pub applies: AtomicUsize,
}

#[async_trait]
impl PolicyStore for AlwaysConflictingStore {
    async fn get(&self, name: &str) -> Result<VersionedPolicy> {
        self.inner.get(name).await
    }

    async fn apply(
        &self,
        name: &str,
        expected: ResourceVersion,
        _patch: &MergePatch,
    ) -> Result<ResourceVersion> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        Err(Error::version_conflict(name, expected, expected.next()))
    }
}

/// Store serving a fixed policy whose calls fail as configured.
pub struct FailingStore {
    pub policy: Policy,
    pub get_error: Option<Error>,
    pub apply_error: Error,
    pub gets: AtomicUsize,
}

impl FailingStore {
    pub fn new(policy: Policy, get_error: Option<Error>, apply_error: Error) -> Self {
        Self {
            policy,
            get_error,
            apply_error,
            gets: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PolicyStore for FailingStore {
    async fn get(&self, _name: &str) -> Result<VersionedPolicy> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        match &self.get_error {
            Some(e) => Err(e.clone()),
            None => Ok(VersionedPolicy::new(
                self.policy.clone(),
                ResourceVersion::initial(),
            )),
        }
    }

    async fn apply(
        &self,
        _name: &str,
        _expected: ResourceVersion,
        _patch: &MergePatch,
    ) -> Result<ResourceVersion> {
        Err(self.apply_error.clone())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryPolicyStore>,
    pub resources: Arc<InMemoryResources>,
    pub events: Arc<InMemoryEventSink>,
    pub reconciler: Reconciler,
}

pub fn test_config() -> ReconcilerConfig {
    ReconcilerConfig::new().with_conflict_backoff(0)
}

/// Reconciler over in-memory collaborators with `p1` seeded from `stored`.
pub async fn harness(stored: Vec<Violation>) -> Harness {
    init_tracing();
    let store = InMemoryPolicyStore::new_arc();
    let resources = InMemoryResources::new_arc();
    let events = InMemoryEventSink::new_arc();
    store.insert(Policy::new("p1").with_violations(stored)).await;

    let reconciler = Reconciler::builder()
        .with_store(Arc::new(TracingPolicyStore::new(Arc::clone(&store))))
        .with_existence(resources.clone())
        .with_events(events.clone())
        .with_config(test_config())
        .build()
        .expect("valid reconciler");

    Harness {
        store,
        resources,
        events,
        reconciler,
    }
}

/// Reconciler over an arbitrary store.
pub fn reconciler_over(
    store: Arc<dyn PolicyStore>,
    resources: Arc<InMemoryResources>,
    events: Arc<dyn EventSink>,
    config: ReconcilerConfig,
) -> Reconciler {
    init_tracing();
    Reconciler::builder()
        .with_store(store)
        .with_existence(resources)
        .with_events(events)
        .with_config(config)
        .build()
        .expect("valid reconciler")
}

pub async fn stored(store: &InMemoryPolicyStore, name: &str) -> Vec<Violation> {
    store
        .get(name)
        .await
        .expect("policy exists")
        .policy
        .violations()
        .to_vec()
}
