//! Violation-state reconciliation for kpolicy.
//!
//! Each policy stores the violations currently raised by its rules. This
//! crate takes one freshly observed violation and folds it into that list:
//!
//! - **Prune**: entries whose resource no longer exists are removed, with a
//!   notification sent to the [`EventSink`]
//! - **Update**: the entry with the same (kind, resource, rule) takes the
//!   new reason and message
//! - **Insert**: an unseen tuple is appended
//! - **Commit**: the difference is sent to the [`PolicyStore`] as a JSON
//!   merge patch conditioned on the version that was read
//!
//! Version conflicts re-run the whole sequence a bounded number of times.
//! Any stored entry whose existence cannot be determined fails the call
//! with a retryable error instead of being guessed at.
//!
//! # Example
//!
//! ```ignore
//! use kpolicy_core::Policy;
//! use kpolicy_violation::{
//!     InMemoryEventSink, InMemoryPolicyStore, InMemoryResources, Reconciler, ViolationInfo,
//! };
//!
//! #[tokio::main]
//! async fn main() -> kpolicy_violation::Result<()> {
//!     let store = InMemoryPolicyStore::new_arc();
//!     store.insert(Policy::new("p1")).await;
//!
//!     let reconciler = Reconciler::builder()
//!         .with_store(store)
//!         .with_existence(InMemoryResources::new_arc())
//!         .with_events(InMemoryEventSink::new_arc())
//!         .build()?;
//!
//!     let info = ViolationInfo::new("p1", "Pod", "ns/a", "rule1").with_reason("r1");
//!     reconciler.reconcile(info).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod events;
pub mod existence;
pub mod merge;
pub mod patch;
pub mod reconciler;
pub mod store;
pub mod types;

// Re-export main types
pub use config::ReconcilerConfig;
pub use error::{Error, Result};
pub use events::{ChannelEventSink, EventSink, InMemoryEventSink};
pub use existence::{InMemoryResources, ResourceExistence, exists_from_lookup};
pub use merge::{MergeOutcome, merge_violations};
pub use patch::{MergePatch, PatchComputer, PatchOutcome};
pub use reconciler::{Reconciler, ReconcilerBuilder, ViolationGenerator};
pub use store::{InMemoryPolicyStore, PolicyStore, TracingPolicyStore};
pub use types::{EventInfo, ReconcileOutcome, TupleChange, ViolationInfo};
