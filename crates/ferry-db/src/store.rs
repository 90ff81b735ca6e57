//! Repository trait for the file table
//!
//! Every coordination decision in the pipeline goes through this interface. The
//! claim is the only way into `processing`, and terminal writes are fenced by the
//! claim token, so implementations must apply each operation atomically.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::models::{CommitRecord, FileRecord, NewFile, Share};
use ferry_core::{DispatchPolicy, RetentionPolicy};
use std::collections::HashMap;
use uuid::Uuid;

/// Concurrency caps checked atomically with the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimLimits {
    pub max_global: i64,
    pub max_per_owner: i64,
}

impl ClaimLimits {
    pub fn unbounded() -> Self {
        Self {
            max_global: i64::MAX,
            max_per_owner: i64::MAX,
        }
    }
}

impl From<&DispatchPolicy> for ClaimLimits {
    fn from(policy: &DispatchPolicy) -> Self {
        Self {
            max_global: policy.max_global as i64,
            max_per_owner: policy.max_per_owner as i64,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The record is now `processing` and carries the returned claim token.
    Claimed(FileRecord),
    /// Another worker holds the record, or it is already completed.
    AlreadyClaimed,
    /// Claiming would exceed the global or per-owner cap.
    AtCapacity,
    NotFound,
}

/// Records currently in `processing`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InFlightCounts {
    pub global: usize,
    pub per_owner: HashMap<Uuid, usize>,
}

impl InFlightCounts {
    pub fn for_owner(&self, owner_id: &Uuid) -> usize {
        self.per_owner.get(owner_id).copied().unwrap_or(0)
    }
}

/// Candidate query knobs for one dispatcher tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateQuery {
    pub small_file_threshold_bytes: i64,
    /// Rows read per bucket (small pending, large pending, failed).
    pub scan_limit: i64,
    /// Failed records at or above this many attempts are skipped.
    pub max_attempts: i32,
}

impl From<&DispatchPolicy> for CandidateQuery {
    fn from(policy: &DispatchPolicy) -> Self {
        Self {
            small_file_threshold_bytes: policy.small_file_threshold_bytes,
            scan_limit: policy.scan_limit,
            max_attempts: policy.max_attempts,
        }
    }
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Insert a new `pending` record.
    async fn insert(&self, new: NewFile, expires_at: DateTime<Utc>) -> Result<FileRecord>;

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>>;

    async fn get_for_owner(&self, owner_id: Uuid, id: Uuid) -> Result<Option<FileRecord>>;

    /// Newest first.
    async fn list_by_owner(&self, owner_id: Uuid, limit: i64, offset: i64)
        -> Result<Vec<FileRecord>>;

    /// `pending|failed -> processing`, guarded by the current status and the caps.
    async fn claim(&self, id: Uuid, limits: ClaimLimits) -> Result<ClaimOutcome>;

    /// `processing -> completed`. Returns false when the claim token no longer matches.
    async fn complete(&self, id: Uuid, claim_token: Uuid, commit: &CommitRecord) -> Result<bool>;

    /// `processing -> failed`. Returns false when the claim token no longer matches.
    async fn fail(&self, id: Uuid, claim_token: Uuid, error: &str) -> Result<bool>;

    /// Force every `processing` record whose last transition is before `cutoff` to
    /// `failed`, revoking its claim token. Returns the reaped ids.
    async fn reap_stale(&self, cutoff: DateTime<Utc>, reason: &str) -> Result<Vec<Uuid>>;

    async fn in_flight(&self) -> Result<InFlightCounts>;

    /// Dispatchable records: small pending, large pending and retryable failed, each
    /// bucket ordered by size then age and bounded by `scan_limit`. Records still
    /// awaiting a presigned upload are never returned.
    async fn dispatch_candidates(&self, query: CandidateQuery) -> Result<Vec<FileRecord>>;

    /// Pending records with an outstanding presigned upload, oldest first.
    async fn awaiting_upload(&self, limit: i64) -> Result<Vec<FileRecord>>;

    /// Clear the upload deadline so the record becomes dispatchable. Returns false
    /// when the record was not awaiting an upload.
    async fn mark_uploaded(&self, id: Uuid) -> Result<bool>;

    /// Fill `expires_at` for an owner's records that lack it. Returns rows updated.
    async fn backfill_expires_at(&self, owner_id: Uuid, retention: &RetentionPolicy)
        -> Result<u64>;

    /// Delete an owner's records with `expires_at <= now`, cascading shares.
    /// Returns the deleted records.
    async fn delete_expired(&self, owner_id: Uuid, now: DateTime<Utc>) -> Result<Vec<FileRecord>>;

    /// Completed records committed before `committed_before` that still hold a
    /// staging key.
    async fn staging_cleanup_candidates(
        &self,
        committed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FileRecord>>;

    /// Clear the staging key if it still equals `staging_key`.
    async fn clear_staging_key(&self, id: Uuid, staging_key: &str) -> Result<bool>;

    /// Set the retention of a completed record, provided it still holds
    /// `expected_units`. Returns false when the record moved on.
    async fn update_retention(
        &self,
        id: Uuid,
        expected_units: i32,
        retention_units: i32,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn insert_share(&self, share: Share) -> Result<Share>;

    async fn list_shares(&self, file_id: Uuid) -> Result<Vec<Share>>;

    async fn health_check(&self) -> Result<()>;
}
