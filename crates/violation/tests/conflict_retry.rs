//! Optimistic concurrency: conflicting writers re-run and never lose updates.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{AlwaysConflictingStore, YieldingStore, reconciler_over, stored, test_config, violation};
use kpolicy_core::Policy;
use kpolicy_violation::{Error, InMemoryEventSink, InMemoryPolicyStore, InMemoryResources, ViolationInfo};

#[tokio::test]
async fn concurrent_disjoint_reports_both_land() {
    // GIVEN: two reconcilers sharing a store that interleaves fetch and apply
    let inner = InMemoryPolicyStore::new_arc();
    inner.insert(Policy::new("p1")).await;
    let store = Arc::new(YieldingStore::new(Arc::clone(&inner)));
    let resources = InMemoryResources::new_arc();
    resources.add("Pod", "ns/a").await;
    resources.add("Pod", "ns/b").await;
    let events = InMemoryEventSink::new_arc();

    let first = reconciler_over(store.clone(), resources.clone(), events.clone(), test_config());
    let second = reconciler_over(store.clone(), resources.clone(), events.clone(), test_config());

    // WHEN: both report disjoint tuples at once
    let (a, b) = tokio::join!(
        first.reconcile(ViolationInfo::new("p1", "Pod", "ns/a", "rule1").with_reason("r1")),
        second.reconcile(ViolationInfo::new("p1", "Pod", "ns/b", "rule1").with_reason("r1")),
    );

    // THEN: both succeed, one of them after a retry, and neither update is lost
    let a = a.expect("first reconcile");
    let b = b.expect("second reconcile");
    assert_eq!(a.attempts.saturating_add(b.attempts), 3);
    assert_eq!(store.applies.load(Ordering::SeqCst), 3);

    let keys: Vec<_> = stored(&inner, "p1")
        .await
        .iter()
        .map(|v| v.resource.clone())
        .collect();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&"ns/a".to_string()));
    assert!(keys.contains(&"ns/b".to_string()));
}

#[tokio::test]
async fn many_concurrent_reports_converge() {
    let inner = InMemoryPolicyStore::new_arc();
    inner.insert(Policy::new("p1")).await;
    let store = Arc::new(YieldingStore::new(Arc::clone(&inner)));
    let resources = InMemoryResources::new_arc();
    let events = InMemoryEventSink::new_arc();
    for i in 0..4 {
        resources.add("Pod", format!("ns/{i}")).await;
    }

    let config = test_config().with_max_conflict_retries(8);
    let reconcilers: Vec<_> = (0..4)
        .map(|_| reconciler_over(store.clone(), resources.clone(), events.clone(), config.clone()))
        .collect();
    let calls = reconcilers.iter().enumerate().map(|(i, r)| {
        r.reconcile(ViolationInfo::new("p1", "Pod", format!("ns/{i}"), "rule1"))
    });

    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    let list = stored(&inner, "p1").await;
    assert_eq!(list.len(), 4);
    assert!(Policy::new("p1").with_violations(list).validate().is_ok());
}

#[tokio::test]
async fn conflict_retries_are_bounded() {
    let inner = InMemoryPolicyStore::new_arc();
    inner
        .insert(Policy::new("p1").with_violations(vec![violation("Pod", "ns/a", "rule1", "r1")]))
        .await;
    let store = Arc::new(AlwaysConflictingStore {
        inner: Arc::clone(&inner),
        applies: AtomicUsize::new(0),
    });
    let resources = InMemoryResources::new_arc();
    resources.add("Pod", "ns/a").await;
    let events = InMemoryEventSink::new_arc();

    let reconciler = reconciler_over(
        store.clone(),
        resources,
        events,
        test_config().with_max_conflict_retries(2),
    );
    let result = reconciler
        .reconcile(ViolationInfo::new("p1", "Pod", "ns/a", "rule1").with_reason("r2"))
        .await;

    assert_eq!(result.err(), Some(Error::conflict_retries_exhausted("p1", 3)));
    assert_eq!(store.applies.load(Ordering::SeqCst), 3);
    assert_eq!(stored(&inner, "p1").await, vec![violation("Pod", "ns/a", "rule1", "r1")]);
}

#[tokio::test]
async fn largest_accepted_retry_count_still_terminates() {
    let inner = InMemoryPolicyStore::new_arc();
    inner
        .insert(Policy::new("p1").with_violations(vec![violation("Pod", "ns/a", "rule1", "r1")]))
        .await;
    let store = Arc::new(AlwaysConflictingStore {
        inner: Arc::clone(&inner),
        applies: AtomicUsize::new(0),
    });
    let resources = InMemoryResources::new_arc();
    resources.add("Pod", "ns/a").await;

    let reconciler = reconciler_over(
        store.clone(),
        resources,
        InMemoryEventSink::new_arc(),
        test_config().with_max_conflict_retries(100),
    );
    let result = reconciler
        .reconcile(ViolationInfo::new("p1", "Pod", "ns/a", "rule1").with_reason("r2"))
        .await;

    assert_eq!(result.err(), Some(Error::conflict_retries_exhausted("p1", 101)));
    assert_eq!(store.applies.load(Ordering::SeqCst), 101);
}

#[tokio::test]
async fn conflict_retry_refetches_before_merging() {
    // GIVEN: a writer that lands between our fetch and our apply
    let inner = InMemoryPolicyStore::new_arc();
    inner.insert(Policy::new("p1")).await;
    let store = Arc::new(YieldingStore::new(Arc::clone(&inner)));
    let resources = InMemoryResources::new_arc();
    resources.add("Pod", "ns/a").await;
    let reconciler = reconciler_over(
        store.clone(),
        resources.clone(),
        InMemoryEventSink::new_arc(),
        test_config(),
    );

    let intruder = async {
        inner
            .insert(Policy::new("p1").with_violations(vec![violation("Pod", "ns/a", "rule9", "x")]))
            .await;
    };
    let (outcome, ()) = tokio::join!(
        reconciler.reconcile(ViolationInfo::new("p1", "Pod", "ns/a", "rule1").with_reason("r1")),
        intruder,
    );

    // THEN: the retry saw the intruder's entry and kept it
    let outcome = outcome.expect("reconcile");
    assert_eq!(outcome.attempts, 2);
    let rules: Vec<_> = stored(&inner, "p1").await.into_iter().map(|v| v.rule).collect();
    assert_eq!(rules, vec!["rule9".to_string(), "rule1".to_string()]);
}
