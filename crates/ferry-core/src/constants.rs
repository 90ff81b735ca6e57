//! Deployment-wide defaults for the ingestion and commit pipeline.

/// Length of one retention epoch on the durable network (14 days).
pub const EPOCH_DURATION_MS: i64 = 1_209_600_000;

/// Largest retention request the durable network accepts.
pub const MAX_RETENTION_UNITS: i32 = 53;
pub const DEFAULT_RETENTION_UNITS: i32 = 1;

pub const MAX_FILE_SIZE_MB: usize = 100;

// Dispatcher
pub const DISPATCH_MAX_GLOBAL: usize = 4;
pub const DISPATCH_MAX_PER_OWNER: usize = 2;
pub const DISPATCH_SMALL_FILE_THRESHOLD_MB: i64 = 50;
pub const DISPATCH_SCAN_LIMIT: i64 = 200;
pub const MAX_COMMIT_ATTEMPTS: i32 = 5;
pub const DISPATCH_TICK_INTERVAL_SECS: u64 = 60;

// Committer
pub const COMMIT_STAGING_READ_TIMEOUT_SECS: u64 = 60;
pub const COMMIT_WRITE_BASE_TIMEOUT_SECS: u64 = 120;
pub const COMMIT_WRITE_PER_UNIT_TIMEOUT_SECS: u64 = 10;
pub const COMMIT_WRITE_BASELINE_UNITS: i32 = 1;
pub const COMMIT_WRITE_MAX_TIMEOUT_SECS: u64 = 600;
pub const COMMIT_VERIFY_TIMEOUT_SECS: u64 = 60;

// Reaper and staging lifecycle
pub const STALE_THRESHOLD_SECS: u64 = 900;
pub const STAGING_GRACE_SECS: u64 = 6 * 60 * 60;
pub const STAGING_JANITOR_BATCH: i64 = 50;

// Retrieval
pub const RETRIEVAL_MAX_ATTEMPTS: u32 = 5;
pub const RETRIEVAL_BASE_DELAY_MS: u64 = 250;
pub const RETRIEVAL_MAX_DELAY_MS: u64 = 8_000;
pub const RETRIEVAL_TRANSIENT_MULTIPLIER: f64 = 2.0;
pub const RETRIEVAL_REPLICATION_MULTIPLIER: f64 = 3.0;

pub const PRESIGNED_UPLOAD_TTL_SECS: u64 = 900;

/// Header carrying the authenticated owner, set by the upstream authenticator.
pub const OWNER_HEADER: &str = "x-owner-id";

/// `last_error` recorded when the reaper forces a stuck claim to failed.
pub const STALE_CLAIM_REASON: &str = "stale claim reaped";
