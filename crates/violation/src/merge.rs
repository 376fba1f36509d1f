//! Folding a violation report into a stored violation list.

use std::collections::HashSet;

use kpolicy_core::Violation;
use tracing::debug;

use crate::types::{TupleChange, ViolationInfo};

/// The new violation list and what changed to produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Entries to store, in their original order, the report's tuple last
    /// if it was inserted.
    pub violations: Vec<Violation>,
    /// Stored entries whose resource no longer exists.
    pub dropped: Vec<Violation>,
    /// Whether the report updated an entry or was appended.
    pub change: TupleChange,
    /// Repeated tuples discarded from a stored list that broke uniqueness.
    pub duplicates_removed: usize,
}

/// Merge `info` into `existing`.
///
/// `is_live` answers for each stored entry whether its own resource still
/// exists. Entries that are gone are dropped, the entry with the report's
/// tuple takes the report's reason and message, and a report with no
/// matching entry is appended unless its stored entry was just dropped.
/// Only the first entry per tuple is considered, so a repeated tuple is
/// dropped at most once.
pub fn merge_violations(
    existing: &[Violation],
    info: &ViolationInfo,
    is_live: impl Fn(&Violation) -> bool,
) -> MergeOutcome {
    let target = info.key();
    let mut seen = HashSet::with_capacity(existing.len());
    let mut violations = Vec::with_capacity(existing.len().saturating_add(1));
    let mut dropped = Vec::new();
    let mut matched = false;
    let mut target_gone = false;
    let mut duplicates_removed: usize = 0;

    for entry in existing {
        let key = entry.key();
        if !seen.insert(key.clone()) {
            debug!(key = %key, "Discarding repeated violation");
            duplicates_removed = duplicates_removed.saturating_add(1);
            continue;
        }

        if !is_live(entry) {
            target_gone |= entry.matches(&target);
            dropped.push(entry.clone());
            continue;
        }

        if key == target {
            matched = true;
            violations.push(
                entry
                    .clone()
                    .with_reason(&info.reason)
                    .with_message(&info.message),
            );
        } else {
            violations.push(entry.clone());
        }
    }

    let change = if matched {
        TupleChange::Updated
    } else if target_gone {
        TupleChange::Pruned
    } else {
        violations.push(info.to_violation());
        TupleChange::Inserted
    };

    MergeOutcome {
        violations,
        dropped,
        change,
        duplicates_removed,
    }
}
