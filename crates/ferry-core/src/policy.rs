//! Pipeline policies
//!
//! Plain values derived from [`crate::Config`] and handed to the workers and services.
//! Keeping them separate from the environment loader lets tests build them directly.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::constants::*;

/// Retention epochs and the expiry derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub epoch_duration_ms: i64,
    pub max_units: i32,
    pub default_units: i32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            epoch_duration_ms: EPOCH_DURATION_MS,
            max_units: MAX_RETENTION_UNITS,
            default_units: DEFAULT_RETENTION_UNITS,
        }
    }
}

impl RetentionPolicy {
    /// Units counted toward expiry: never more than `max_units`, never negative.
    pub fn effective_units(&self, units: i32) -> i32 {
        units.clamp(0, self.max_units)
    }

    /// `created_at + min(units, max_units) * epoch_duration`
    pub fn expires_at(&self, created_at: DateTime<Utc>, units: i32) -> DateTime<Utc> {
        let ms = i64::from(self.effective_units(units)).saturating_mul(self.epoch_duration_ms);
        created_at + ChronoDuration::milliseconds(ms)
    }

    pub fn is_valid_request(&self, units: i32) -> bool {
        units >= 1 && units <= self.max_units
    }
}

/// Concurrency caps and candidate selection knobs for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub max_global: usize,
    pub max_per_owner: usize,
    /// Pending files strictly below this size are dispatched first.
    pub small_file_threshold_bytes: i64,
    /// Upper bound on rows read per candidate bucket in one tick.
    pub scan_limit: i64,
    /// Failed files with this many attempts are no longer retried automatically.
    pub max_attempts: i32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_global: DISPATCH_MAX_GLOBAL,
            max_per_owner: DISPATCH_MAX_PER_OWNER,
            small_file_threshold_bytes: DISPATCH_SMALL_FILE_THRESHOLD_MB * 1024 * 1024,
            scan_limit: DISPATCH_SCAN_LIMIT,
            max_attempts: MAX_COMMIT_ATTEMPTS,
        }
    }
}

/// Timeouts governing one commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPolicy {
    pub staging_read_timeout: Duration,
    pub write_base_timeout: Duration,
    pub write_per_unit_timeout: Duration,
    pub write_baseline_units: i32,
    pub write_max_timeout: Duration,
    /// Confirm ambiguous writes by reading the content back before completing.
    pub verify_ambiguous: bool,
    /// Bound on the durable read-back of an ambiguous write.
    pub verify_timeout: Duration,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            staging_read_timeout: Duration::from_secs(COMMIT_STAGING_READ_TIMEOUT_SECS),
            write_base_timeout: Duration::from_secs(COMMIT_WRITE_BASE_TIMEOUT_SECS),
            write_per_unit_timeout: Duration::from_secs(COMMIT_WRITE_PER_UNIT_TIMEOUT_SECS),
            write_baseline_units: COMMIT_WRITE_BASELINE_UNITS,
            write_max_timeout: Duration::from_secs(COMMIT_WRITE_MAX_TIMEOUT_SECS),
            verify_ambiguous: true,
            verify_timeout: Duration::from_secs(COMMIT_VERIFY_TIMEOUT_SECS),
        }
    }
}

impl CommitPolicy {
    /// `min(base + per_unit * max(0, units - baseline), max)`
    pub fn write_timeout(&self, retention_units: i32) -> Duration {
        let extra_units = retention_units.saturating_sub(self.write_baseline_units).max(0) as u32;
        let scaled = self
            .write_base_timeout
            .saturating_add(self.write_per_unit_timeout.saturating_mul(extra_units));
        scaled.min(self.write_max_timeout)
    }

    /// Longest a single commit attempt can run: staging read, capped write and, when
    /// enabled, the read-back used to verify an ambiguous write.
    pub fn max_duration(&self) -> Duration {
        let read_and_write = self.staging_read_timeout.saturating_add(self.write_max_timeout);
        if self.verify_ambiguous {
            read_and_write.saturating_add(self.verify_timeout)
        } else {
            read_and_write
        }
    }
}

/// Backoff schedule for durable reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub transient_multiplier: f64,
    /// Applied instead of `transient_multiplier` while content is still replicating.
    pub replication_multiplier: f64,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRIEVAL_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(RETRIEVAL_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RETRIEVAL_MAX_DELAY_MS),
            transient_multiplier: RETRIEVAL_TRANSIENT_MULTIPLIER,
            replication_multiplier: RETRIEVAL_REPLICATION_MULTIPLIER,
        }
    }
}

impl RetrievalPolicy {
    /// Delay before retry number `attempt` (0-based), exponential then capped.
    pub fn delay_for(&self, attempt: u32, not_yet_replicated: bool) -> Duration {
        let multiplier = if not_yet_replicated {
            self.replication_multiplier
        } else {
            self.transient_multiplier
        };
        let factor = multiplier.powi(attempt.min(32) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}
