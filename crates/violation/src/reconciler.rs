//! Reconciler implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use either::Either;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use kpolicy_core::{Violation, VersionedPolicy};
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::config::ReconcilerConfig;
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::existence::ResourceExistence;
use crate::merge::merge_violations;
use crate::patch::{PatchComputer, PatchOutcome};
use crate::store::PolicyStore;
use crate::types::{EventInfo, ReconcileOutcome, ViolationInfo};

type ResourceRef = (String, String);

/// Accepts newly detected violations from the policy engine.
#[async_trait]
pub trait ViolationGenerator: Send + Sync {
    /// Record a violation against its policy.
    async fn create(&self, info: ViolationInfo) -> Result<()>;
}

/// Folds violation reports into the owning policy's stored violation list.
///
/// Holds no policy state between calls: every attempt starts from a fresh
/// read and commits through a version-conditioned merge patch.
pub struct Reconciler {
    store: Arc<dyn PolicyStore>,
    existence: Arc<dyn ResourceExistence>,
    events: Arc<dyn EventSink>,
    patcher: PatchComputer,
    config: ReconcilerConfig,
    span: Span,
}

impl Reconciler {
    /// Create a new reconciler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn new(
        store: Arc<dyn PolicyStore>,
        existence: Arc<dyn ResourceExistence>,
        events: Arc<dyn EventSink>,
        config: ReconcilerConfig,
    ) -> Result<Self> {
        Self::with_span(store, existence, events, config, default_span())
    }

    fn with_span(
        store: Arc<dyn PolicyStore>,
        existence: Arc<dyn ResourceExistence>,
        events: Arc<dyn EventSink>,
        config: ReconcilerConfig,
        span: Span,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            patcher: PatchComputer::new(Arc::clone(&store)),
            store,
            existence,
            events,
            config,
            span,
        })
    }

    /// Start building a reconciler.
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::new()
    }

    /// Merge one violation report into its policy and commit the result.
    ///
    /// Version conflicts re-run the whole fetch, merge and apply sequence up
    /// to `max_conflict_retries` times.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the report names no policy
    /// - `PolicyNotFound` or `Transient` from the fetch
    /// - `ExistenceUnknown` if any stored entry's resource could not be checked
    /// - `Serialization` or `ApplyRejected` from the commit
    /// - `ConflictRetriesExhausted` if every attempt conflicted
    pub async fn reconcile(&self, info: ViolationInfo) -> Result<ReconcileOutcome> {
        let span = info_span!(
            parent: &self.span,
            "reconcile",
            policy = %info.policy,
            kind = %info.kind,
            resource = %info.resource,
            rule = %info.rule
        );
        self.reconcile_with_retry(&info).instrument(span).await
    }

    async fn reconcile_with_retry(&self, info: &ViolationInfo) -> Result<ReconcileOutcome> {
        info.validate()?;

        let mut attempt: u32 = 0;
        loop {
            attempt = attempt
                .checked_add(1)
                .ok_or_else(|| Error::conflict_retries_exhausted(&info.policy, attempt))?;
            match self.reconcile_once(info, attempt).await {
                Err(e) if e.is_conflict() => {
                    if attempt > self.config.max_conflict_retries {
                        warn!(attempts = attempt, error = %e, "Giving up after version conflicts");
                        return Err(Error::conflict_retries_exhausted(&info.policy, attempt));
                    }
                    let delay = self.config.calculate_backoff(attempt.saturating_sub(1));
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Version conflict, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                other => return other,
            }
        }
    }

    async fn reconcile_once(&self, info: &ViolationInfo, attempt: u32) -> Result<ReconcileOutcome> {
        let snapshot = self.store.get(&info.policy).await?;
        debug!(
            attempt,
            version = %snapshot.version,
            stored = snapshot.policy.violations().len(),
            "Fetched policy"
        );

        let verdicts = self.resolve_existence(&snapshot).await?;
        let merged = merge_violations(snapshot.policy.violations(), info, |entry| {
            verdicts
                .get(&(entry.kind.clone(), entry.resource.clone()))
                .copied()
                .unwrap_or(true)
        });

        let violations = merged.violations.len();
        let mutated = snapshot.policy.with_replaced_violations(merged.violations);
        let patched = match self.patcher.apply_diff(&snapshot, &mutated).await? {
            PatchOutcome::Applied(version) => {
                debug!(version = %version, "Committed violation list");
                true
            }
            PatchOutcome::Unchanged => false,
        };

        self.emit_removals(info, &merged.dropped).await;

        let outcome = ReconcileOutcome {
            policy: info.policy.clone(),
            attempts: attempt,
            violations,
            dropped: merged.dropped.len(),
            duplicates_removed: merged.duplicates_removed,
            change: merged.change,
            patched,
        };
        info!(
            violations = outcome.violations,
            dropped = outcome.dropped,
            duplicates_removed = outcome.duplicates_removed,
            change = ?outcome.change,
            patched = outcome.patched,
            "Reconciliation complete"
        );
        Ok(outcome)
    }

    /// Query existence for every distinct (kind, resource) in the snapshot.
    async fn resolve_existence(
        &self,
        snapshot: &VersionedPolicy,
    ) -> Result<HashMap<ResourceRef, bool>> {
        let targets = snapshot
            .policy
            .violations()
            .iter()
            .map(|v| (v.kind.clone(), v.resource.clone()))
            .unique()
            .collect_vec();

        let answers: Vec<(ResourceRef, Result<bool>)> = stream::iter(targets)
            .map(|target| async move {
                let answer = self.existence.exists(&target.0, &target.1).await;
                (target, answer)
            })
            .buffer_unordered(self.config.existence_concurrency)
            .collect()
            .await;

        let (known, unknown): (HashMap<ResourceRef, bool>, Vec<(ResourceRef, Error)>) = answers
            .into_iter()
            .partition_map(|(target, answer)| match answer {
                Ok(exists) => Either::Left((target, exists)),
                Err(e) => Either::Right((target, e)),
            });

        match unknown.first() {
            None => Ok(known),
            Some((_, first)) => {
                for ((kind, resource), e) in &unknown {
                    warn!(%kind, %resource, error = %e, "Resource existence unknown");
                }
                Err(Error::existence_unknown(
                    snapshot.name(),
                    unknown.len(),
                    first.to_string(),
                ))
            }
        }
    }

    async fn emit_removals(&self, info: &ViolationInfo, dropped: &[Violation]) {
        for stale in dropped {
            debug!(stale = %stale.key(), "Removed violation for deleted resource");
            let event = EventInfo::removal(&self.config.event_kind, info);
            if let Err(e) = self.events.emit(event).await {
                warn!(stale = %stale.key(), error = %e, "Failed to record removal event");
            }
        }
    }

    /// Whether `kind`/`resource` currently exists.
    ///
    /// # Errors
    ///
    /// Propagates the existence lookup's error after logging it.
    pub async fn is_active(&self, kind: &str, resource: &str) -> Result<bool> {
        self.existence
            .exists(kind, resource)
            .instrument(self.span.clone())
            .await
            .inspect_err(|e| warn!(parent: &self.span, kind, resource, error = %e, "Unable to get resource"))
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

#[async_trait]
impl ViolationGenerator for Reconciler {
    async fn create(&self, info: ViolationInfo) -> Result<()> {
        self.reconcile(info).await.map(|_| ())
    }
}

fn default_span() -> Span {
    info_span!("violation_reconciler")
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    store: Option<Arc<dyn PolicyStore>>,
    existence: Option<Arc<dyn ResourceExistence>>,
    events: Option<Arc<dyn EventSink>>,
    config: ReconcilerConfig,
    span: Option<Span>,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            existence: None,
            events: None,
            config: ReconcilerConfig::default(),
            span: None,
        }
    }

    /// Set the policy store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the resource existence lookup.
    #[must_use]
    pub fn with_existence(mut self, existence: Arc<dyn ResourceExistence>) -> Self {
        self.existence = Some(existence);
        self
    }

    /// Set the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the span every reconciliation is logged under.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Set the maximum number of conflict retries.
    #[must_use]
    pub const fn max_conflict_retries(mut self, retries: u32) -> Self {
        self.config.max_conflict_retries = retries;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a collaborator is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<Reconciler> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("Policy store is required"))?;
        let existence = self
            .existence
            .ok_or_else(|| Error::invalid_config("Resource existence lookup is required"))?;
        let events = self
            .events
            .ok_or_else(|| Error::invalid_config("Event sink is required"))?;
        let span = self.span.unwrap_or_else(default_span);

        Reconciler::with_span(store, existence, events, self.config, span)
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
