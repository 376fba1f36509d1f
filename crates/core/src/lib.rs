//! Core policy types for kpolicy.
//!
//! A [`Policy`] owns an ordered list of [`Violation`]s, each identified by a
//! [`ViolationKey`]. The store hands policies out as [`VersionedPolicy`] so
//! that writers can update them under optimistic concurrency.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Policy, PolicyStatus, ResourceVersion, VersionedPolicy, Violation, ViolationKey};
