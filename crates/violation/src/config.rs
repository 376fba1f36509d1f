//! Configuration for the violation reconciler.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of re-runs after a version conflict.
const MAX_CONFLICT_RETRIES: u32 = 3;

/// Largest accepted `max_conflict_retries`.
const CONFLICT_RETRY_LIMIT: u32 = 100;

/// Base delay before re-running after a conflict (in milliseconds).
const CONFLICT_BACKOFF_MS: u64 = 50;

/// Maximum conflict backoff delay (in milliseconds).
const MAX_BACKOFF_MS: u64 = 1000;

/// Existence queries in flight at once for a single reconciliation.
const EXISTENCE_CONCURRENCY: usize = 8;

/// Kind stamped on removal notifications.
const EVENT_KIND: &str = "Policy";

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Re-runs of fetch, merge and apply allowed after a version conflict.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    /// Base delay for exponential backoff between conflict retries.
    #[serde(default = "default_conflict_backoff_ms")]
    pub conflict_backoff_ms: u64,

    /// Upper bound for the conflict backoff.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Concurrent resource existence queries per reconciliation.
    #[serde(default = "default_existence_concurrency")]
    pub existence_concurrency: usize,

    /// Kind reported on removal events.
    #[serde(default = "default_event_kind")]
    pub event_kind: String,
}

const fn default_max_conflict_retries() -> u32 {
    MAX_CONFLICT_RETRIES
}

const fn default_conflict_backoff_ms() -> u64 {
    CONFLICT_BACKOFF_MS
}

const fn default_max_backoff_ms() -> u64 {
    MAX_BACKOFF_MS
}

const fn default_existence_concurrency() -> usize {
    EXISTENCE_CONCURRENCY
}

fn default_event_kind() -> String {
    EVENT_KIND.to_string()
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_max_conflict_retries(),
            conflict_backoff_ms: default_conflict_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            existence_concurrency: default_existence_concurrency(),
            event_kind: default_event_kind(),
        }
    }
}

impl ReconcilerConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of conflict retries.
    #[must_use]
    pub const fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Set the base backoff delay in milliseconds.
    #[must_use]
    pub const fn with_conflict_backoff(mut self, backoff_ms: u64) -> Self {
        self.conflict_backoff_ms = backoff_ms;
        self
    }

    /// Set the maximum backoff delay in milliseconds.
    #[must_use]
    pub const fn with_max_backoff(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms;
        self
    }

    /// Set the number of concurrent existence queries.
    #[must_use]
    pub const fn with_existence_concurrency(mut self, concurrency: usize) -> Self {
        self.existence_concurrency = concurrency;
        self
    }

    /// Set the kind reported on removal events.
    #[must_use]
    pub fn with_event_kind(mut self, kind: impl Into<String>) -> Self {
        self.event_kind = kind.into();
        self
    }

    /// Calculate the delay before conflict retry number `attempt` (0-based).
    ///
    /// delay = base * 2^attempt, capped at `max_backoff_ms`.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay_ms = self
            .conflict_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `max_conflict_retries` exceeds 100,
    /// `existence_concurrency` is zero or `event_kind` is blank.
    pub fn validate(&self) -> Result<()> {
        if self.max_conflict_retries > CONFLICT_RETRY_LIMIT {
            return Err(Error::invalid_config(format!(
                "max_conflict_retries must be at most {CONFLICT_RETRY_LIMIT}, got {}",
                self.max_conflict_retries
            )));
        }
        if self.existence_concurrency == 0 {
            return Err(Error::invalid_config(
                "existence_concurrency must be at least 1",
            ));
        }
        if self.event_kind.trim().is_empty() {
            return Err(Error::invalid_config("event_kind must not be empty"));
        }
        Ok(())
    }

    /// Load configuration from environment variables on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a variable is set but does not parse.
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    fn merge_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup("KPOLICY_MAX_CONFLICT_RETRIES") {
            self.max_conflict_retries = parse_env("KPOLICY_MAX_CONFLICT_RETRIES", &value)?;
        }
        if let Some(value) = lookup("KPOLICY_CONFLICT_BACKOFF_MS") {
            self.conflict_backoff_ms = parse_env("KPOLICY_CONFLICT_BACKOFF_MS", &value)?;
        }
        if let Some(value) = lookup("KPOLICY_MAX_BACKOFF_MS") {
            self.max_backoff_ms = parse_env("KPOLICY_MAX_BACKOFF_MS", &value)?;
        }
        if let Some(value) = lookup("KPOLICY_EXISTENCE_CONCURRENCY") {
            self.existence_concurrency = parse_env("KPOLICY_EXISTENCE_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("KPOLICY_EVENT_KIND") {
            self.event_kind = value;
        }
        self.validate()?;
        Ok(self)
    }

    /// Load configuration from a file.
    ///
    /// Files ending in `.json` are read as JSON, anything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the file cannot be read, does not parse,
    /// or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("cannot read '{}': {e}", path.display()))
        })?;

        let config: Self = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| Error::invalid_config(e.to_string()))?
        } else {
            toml::from_str(&content).map_err(|e| Error::invalid_config(e.to_string()))?
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::invalid_config(format!("{key}='{value}': {e}")))
}
