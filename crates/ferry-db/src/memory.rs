//! In-process file store
//!
//! Every operation runs under one mutex, which gives the same atomicity the
//! Postgres repository gets from conditional updates.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::models::{CommitRecord, FileRecord, FileStatus, NewFile, Share};
use ferry_core::RetentionPolicy;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::store::{CandidateQuery, ClaimLimits, ClaimOutcome, FileStore, InFlightCounts};

#[derive(Default)]
struct Tables {
    files: HashMap<Uuid, FileRecord>,
    shares: HashMap<Uuid, Share>,
}

#[derive(Default)]
pub struct InMemoryFileStore {
    tables: Mutex<Tables>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a record's last transition into the past.
    pub fn backdate_status(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(record) = self.tables().files.get_mut(&id) {
            record.last_status_at = at;
        }
    }

    /// Overwrite stored expiry, including clearing it.
    pub fn set_expires_at(&self, id: Uuid, expires_at: Option<DateTime<Utc>>) {
        if let Some(record) = self.tables().files.get_mut(&id) {
            record.expires_at = expires_at;
        }
    }

    pub fn set_committed_at(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(record) = self.tables().files.get_mut(&id) {
            record.committed_at = Some(at);
        }
    }

    pub fn all(&self) -> Vec<FileRecord> {
        self.tables().files.values().cloned().collect()
    }

    pub fn share_count(&self) -> usize {
        self.tables().shares.len()
    }
}

fn transition(record: &mut FileRecord, next: FileStatus, now: DateTime<Utc>) -> Result<()> {
    if !record.status.can_transition_to(next) {
        bail!(
            "illegal file status transition {} -> {}",
            record.status,
            next
        );
    }
    record.status = next;
    record.last_status_at = now;
    Ok(())
}

fn by_size_then_age(a: &FileRecord, b: &FileRecord) -> std::cmp::Ordering {
    a.size_bytes
        .cmp(&b.size_bytes)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn insert(&self, new: NewFile, expires_at: DateTime<Utc>) -> Result<FileRecord> {
        let mut tables = self.tables();
        if tables.files.contains_key(&new.id) {
            bail!("Failed to insert file record: duplicate id {}", new.id);
        }
        if tables
            .files
            .values()
            .any(|f| f.placeholder_id == new.placeholder_id)
        {
            bail!(
                "Failed to insert file record: duplicate placeholder {}",
                new.placeholder_id
            );
        }
        let record = FileRecord::from_new(new, expires_at);
        tables.files.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>> {
        Ok(self.tables().files.get(&id).cloned())
    }

    async fn get_for_owner(&self, owner_id: Uuid, id: Uuid) -> Result<Option<FileRecord>> {
        Ok(self
            .tables()
            .files
            .get(&id)
            .filter(|f| f.owner_id == owner_id)
            .cloned())
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileRecord>> {
        let mut files: Vec<FileRecord> = self
            .tables()
            .files
            .values()
            .filter(|f| f.owner_id == owner_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(files
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn claim(&self, id: Uuid, limits: ClaimLimits) -> Result<ClaimOutcome> {
        let mut tables = self.tables();
        let (owner_id, status) = match tables.files.get(&id) {
            Some(record) => (record.owner_id, record.status),
            None => return Ok(ClaimOutcome::NotFound),
        };
        if !status.is_claimable() {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let processing = tables
            .files
            .values()
            .filter(|f| f.status == FileStatus::Processing);
        let (global, owner) = processing.fold((0i64, 0i64), |(g, o), f| {
            (g + 1, o + i64::from(f.owner_id == owner_id))
        });
        if global >= limits.max_global || owner >= limits.max_per_owner {
            return Ok(ClaimOutcome::AtCapacity);
        }

        let Some(record) = tables.files.get_mut(&id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        transition(record, FileStatus::Processing, Utc::now())?;
        record.claim_token = Some(Uuid::new_v4());
        record.attempts += 1;
        Ok(ClaimOutcome::Claimed(record.clone()))
    }

    async fn complete(&self, id: Uuid, claim_token: Uuid, commit: &CommitRecord) -> Result<bool> {
        let mut tables = self.tables();
        let Some(record) = tables.files.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != FileStatus::Processing
            || record.claim_token != Some(claim_token)
            || record.external_id.is_some()
        {
            return Ok(false);
        }
        let now = Utc::now();
        transition(record, FileStatus::Completed, now)?;
        record.external_id = Some(commit.external_id.clone());
        record.committed_object_ref = commit.committed_object_ref.clone();
        record.committed_at = Some(now);
        record.last_error = None;
        Ok(true)
    }

    async fn fail(&self, id: Uuid, claim_token: Uuid, error: &str) -> Result<bool> {
        let mut tables = self.tables();
        let Some(record) = tables.files.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != FileStatus::Processing || record.claim_token != Some(claim_token) {
            return Ok(false);
        }
        transition(record, FileStatus::Failed, Utc::now())?;
        record.last_error = Some(error.to_string());
        Ok(true)
    }

    async fn reap_stale(&self, cutoff: DateTime<Utc>, reason: &str) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        let mut reaped = Vec::new();
        for record in self.tables().files.values_mut() {
            if record.status == FileStatus::Processing && record.last_status_at < cutoff {
                transition(record, FileStatus::Failed, now)?;
                record.claim_token = None;
                record.last_error = Some(reason.to_string());
                reaped.push(record.id);
            }
        }
        Ok(reaped)
    }

    async fn in_flight(&self) -> Result<InFlightCounts> {
        let mut counts = InFlightCounts::default();
        for record in self.tables().files.values() {
            if record.status == FileStatus::Processing {
                counts.global += 1;
                *counts.per_owner.entry(record.owner_id).or_default() += 1;
            }
        }
        Ok(counts)
    }

    async fn dispatch_candidates(&self, query: CandidateQuery) -> Result<Vec<FileRecord>> {
        let tables = self.tables();
        let limit = query.scan_limit.max(0) as usize;
        let bucket = |keep: &dyn Fn(&FileRecord) -> bool| {
            let mut rows: Vec<FileRecord> =
                tables.files.values().filter(|f| keep(f)).cloned().collect();
            rows.sort_by(by_size_then_age);
            rows.truncate(limit);
            rows
        };

        let ready = |f: &FileRecord| f.status == FileStatus::Pending && f.upload_deadline.is_none();
        let mut candidates = bucket(&|f: &FileRecord| {
            ready(f) && f.size_bytes < query.small_file_threshold_bytes
        });
        candidates.extend(bucket(&|f: &FileRecord| {
            ready(f) && f.size_bytes >= query.small_file_threshold_bytes
        }));
        candidates.extend(bucket(&|f: &FileRecord| {
            f.status == FileStatus::Failed && f.attempts < query.max_attempts
        }));
        Ok(candidates)
    }

    async fn awaiting_upload(&self, limit: i64) -> Result<Vec<FileRecord>> {
        let tables = self.tables();
        let mut rows: Vec<FileRecord> = tables
            .files
            .values()
            .filter(|f| f.awaiting_upload())
            .cloned()
            .collect();
        rows.sort_by_key(|f| (f.created_at, f.id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn mark_uploaded(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables();
        match tables.files.get_mut(&id) {
            Some(record) if record.awaiting_upload() => {
                record.upload_deadline = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn backfill_expires_at(
        &self,
        owner_id: Uuid,
        retention: &RetentionPolicy,
    ) -> Result<u64> {
        let mut updated = 0;
        for record in self.tables().files.values_mut() {
            if record.owner_id == owner_id && record.expires_at.is_none() {
                record.expires_at =
                    Some(retention.expires_at(record.created_at, record.retention_units));
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_expired(&self, owner_id: Uuid, now: DateTime<Utc>) -> Result<Vec<FileRecord>> {
        let mut tables = self.tables();
        let expired: Vec<Uuid> = tables
            .files
            .values()
            .filter(|f| f.owner_id == owner_id && f.is_expired(now))
            .map(|f| f.id)
            .collect();

        let mut deleted = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(record) = tables.files.remove(&id) {
                deleted.push(record);
            }
        }
        tables
            .shares
            .retain(|_, share| !deleted.iter().any(|f| f.id == share.file_id));
        Ok(deleted)
    }

    async fn staging_cleanup_candidates(
        &self,
        committed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FileRecord>> {
        let mut rows: Vec<FileRecord> = self
            .tables()
            .files
            .values()
            .filter(|f| {
                f.status == FileStatus::Completed
                    && f.staging_key.is_some()
                    && f.committed_at.map(|at| at < committed_before).unwrap_or(false)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|f| f.committed_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn clear_staging_key(&self, id: Uuid, staging_key: &str) -> Result<bool> {
        let mut tables = self.tables();
        match tables.files.get_mut(&id) {
            Some(record) if record.staging_key.as_deref() == Some(staging_key) => {
                record.staging_key = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_retention(
        &self,
        id: Uuid,
        expected_units: i32,
        retention_units: i32,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables();
        match tables.files.get_mut(&id) {
            Some(record)
                if record.status == FileStatus::Completed
                    && record.retention_units == expected_units =>
            {
                record.retention_units = retention_units;
                record.expires_at = Some(expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_share(&self, share: Share) -> Result<Share> {
        let mut tables = self.tables();
        if !tables.files.contains_key(&share.file_id) {
            bail!("Failed to insert share: file {} does not exist", share.file_id);
        }
        tables.shares.insert(share.id, share.clone());
        Ok(share)
    }

    async fn list_shares(&self, file_id: Uuid) -> Result<Vec<Share>> {
        let mut shares: Vec<Share> = self
            .tables()
            .shares
            .values()
            .filter(|s| s.file_id == file_id)
            .cloned()
            .collect();
        shares.sort_by_key(|s| s.created_at);
        Ok(shares)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_file(owner_id: Uuid, size_bytes: i64) -> NewFile {
        let id = Uuid::new_v4();
        NewFile {
            id,
            placeholder_id: format!("ph-{}", id),
            staging_key: format!("staging/{}/{}", owner_id, id),
            owner_id,
            filename: "a.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            size_bytes,
            content_sha256: None,
            encrypted: false,
            retention_units: 1,
            created_at: Utc::now(),
            upload_deadline: None,
        }
    }

    async fn insert(store: &InMemoryFileStore, owner_id: Uuid, size: i64) -> FileRecord {
        store
            .insert(new_file(owner_id, size), Utc::now() + Duration::days(14))
            .await
            .unwrap()
    }

    fn claimed(outcome: ClaimOutcome) -> FileRecord {
        match outcome {
            ClaimOutcome::Claimed(record) => record,
            other => panic!("expected a claim, got {:?}", other),
        }
    }

    fn commit(id: &str) -> CommitRecord {
        CommitRecord {
            external_id: id.to_string(),
            committed_object_ref: Some("0xabc".to_string()),
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = InMemoryFileStore::new();
        let file = insert(&store, Uuid::new_v4(), 10).await;

        let first = claimed(store.claim(file.id, ClaimLimits::unbounded()).await.unwrap());
        assert_eq!(first.status, FileStatus::Processing);
        assert_eq!(first.attempts, 1);
        assert!(first.claim_token.is_some());

        assert!(matches!(
            store.claim(file.id, ClaimLimits::unbounded()).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        ));
        assert!(matches!(
            store.claim(Uuid::new_v4(), ClaimLimits::unbounded()).await.unwrap(),
            ClaimOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn claim_respects_caps() {
        let store = InMemoryFileStore::new();
        let owner_a = Uuid::new_v4();
        let owner_b = Uuid::new_v4();
        let limits = ClaimLimits {
            max_global: 3,
            max_per_owner: 2,
        };

        let a1 = insert(&store, owner_a, 1).await;
        let a2 = insert(&store, owner_a, 1).await;
        let a3 = insert(&store, owner_a, 1).await;
        let b1 = insert(&store, owner_b, 1).await;
        let b2 = insert(&store, owner_b, 1).await;

        claimed(store.claim(a1.id, limits).await.unwrap());
        claimed(store.claim(a2.id, limits).await.unwrap());
        assert!(matches!(
            store.claim(a3.id, limits).await.unwrap(),
            ClaimOutcome::AtCapacity
        ));
        claimed(store.claim(b1.id, limits).await.unwrap());
        assert!(matches!(
            store.claim(b2.id, limits).await.unwrap(),
            ClaimOutcome::AtCapacity
        ));

        let counts = store.in_flight().await.unwrap();
        assert_eq!(counts.global, 3);
        assert_eq!(counts.for_owner(&owner_a), 2);
        assert_eq!(counts.for_owner(&owner_b), 1);
    }

    #[tokio::test]
    async fn complete_requires_current_token() {
        let store = InMemoryFileStore::new();
        let file = insert(&store, Uuid::new_v4(), 10).await;
        let record = claimed(store.claim(file.id, ClaimLimits::unbounded()).await.unwrap());
        let token = record.claim_token.unwrap();

        assert!(!store
            .complete(file.id, Uuid::new_v4(), &commit("blob"))
            .await
            .unwrap());
        assert!(store.complete(file.id, token, &commit("blob")).await.unwrap());

        let stored = store.get(file.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileStatus::Completed);
        assert_eq!(stored.external_id.as_deref(), Some("blob"));
        assert!(stored.committed_at.is_some());

        // Completed is terminal and the identifier is written once.
        assert!(!store.complete(file.id, token, &commit("other")).await.unwrap());
        assert!(!store.fail(file.id, token, "late").await.unwrap());
        assert!(matches!(
            store.claim(file.id, ClaimLimits::unbounded()).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        ));
        assert_eq!(
            store.get(file.id).await.unwrap().unwrap().external_id.as_deref(),
            Some("blob")
        );
    }

    #[tokio::test]
    async fn reaped_claim_cannot_complete() {
        let store = InMemoryFileStore::new();
        let file = insert(&store, Uuid::new_v4(), 10).await;
        let record = claimed(store.claim(file.id, ClaimLimits::unbounded()).await.unwrap());
        let token = record.claim_token.unwrap();

        store.backdate_status(file.id, Utc::now() - Duration::minutes(30));
        let reaped = store
            .reap_stale(Utc::now() - Duration::minutes(15), "stale claim reaped")
            .await
            .unwrap();
        assert_eq!(reaped, vec![file.id]);

        let stored = store.get(file.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileStatus::Failed);
        assert_eq!(stored.claim_token, None);
        assert_eq!(stored.last_error.as_deref(), Some("stale claim reaped"));

        assert!(!store.complete(file.id, token, &commit("blob")).await.unwrap());

        // A fresh claim supersedes the old one.
        let again = claimed(store.claim(file.id, ClaimLimits::unbounded()).await.unwrap());
        assert_eq!(again.attempts, 2);
        assert_ne!(again.claim_token, Some(token));
    }

    #[tokio::test]
    async fn reaper_leaves_recent_claims() {
        let store = InMemoryFileStore::new();
        let file = insert(&store, Uuid::new_v4(), 10).await;
        claimed(store.claim(file.id, ClaimLimits::unbounded()).await.unwrap());

        let reaped = store
            .reap_stale(Utc::now() - Duration::minutes(15), "stale")
            .await
            .unwrap();
        assert!(reaped.is_empty());
    }

    #[tokio::test]
    async fn candidates_are_bucketed_and_ordered() {
        let store = InMemoryFileStore::new();
        let owner = Uuid::new_v4();
        let query = CandidateQuery {
            small_file_threshold_bytes: 100,
            scan_limit: 10,
            max_attempts: 2,
        };

        let large = insert(&store, owner, 500).await;
        let small_b = insert(&store, owner, 50).await;
        let small_a = insert(&store, owner, 5).await;
        let failed = insert(&store, owner, 1).await;
        let exhausted = insert(&store, owner, 1).await;

        let token = claimed(store.claim(failed.id, ClaimLimits::unbounded()).await.unwrap())
            .claim_token
            .unwrap();
        store.fail(failed.id, token, "boom").await.unwrap();
        for _ in 0..2 {
            let token = claimed(
                store
                    .claim(exhausted.id, ClaimLimits::unbounded())
                    .await
                    .unwrap(),
            )
            .claim_token
            .unwrap();
            store.fail(exhausted.id, token, "boom").await.unwrap();
        }

        let ids: Vec<Uuid> = store
            .dispatch_candidates(query)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![small_a.id, small_b.id, large.id, failed.id]);
    }

    #[tokio::test]
    async fn awaiting_upload_is_held_out_of_dispatch() {
        let store = InMemoryFileStore::new();
        let owner = Uuid::new_v4();
        let query = CandidateQuery {
            small_file_threshold_bytes: 100,
            scan_limit: 10,
            max_attempts: 5,
        };
        let staged = insert(&store, owner, 10).await;
        let presigned = store
            .insert(
                NewFile {
                    upload_deadline: Some(Utc::now() + Duration::minutes(15)),
                    ..new_file(owner, 10)
                },
                Utc::now() + Duration::days(14),
            )
            .await
            .unwrap();

        let ids: Vec<Uuid> = store
            .dispatch_candidates(query)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![staged.id]);
        let waiting = store.awaiting_upload(10).await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].id, presigned.id);

        assert!(store.mark_uploaded(presigned.id).await.unwrap());
        assert!(!store.mark_uploaded(presigned.id).await.unwrap());
        assert!(!store.mark_uploaded(staged.id).await.unwrap());
        assert!(store.awaiting_upload(10).await.unwrap().is_empty());
        assert_eq!(store.dispatch_candidates(query).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retention_update_requires_expected_units() {
        let store = InMemoryFileStore::new();
        let file = insert(&store, Uuid::new_v4(), 1).await;
        let later = Utc::now() + Duration::days(60);

        // Only completed records carry retention changes.
        assert!(!store.update_retention(file.id, 1, 3, later).await.unwrap());

        let token = claimed(store.claim(file.id, ClaimLimits::unbounded()).await.unwrap())
            .claim_token
            .unwrap();
        store.complete(file.id, token, &commit("blob")).await.unwrap();

        assert!(store.update_retention(file.id, 1, 3, later).await.unwrap());
        // A writer that read the old value loses.
        assert!(!store.update_retention(file.id, 1, 2, later).await.unwrap());
        let stored = store.get(file.id).await.unwrap().unwrap();
        assert_eq!(stored.retention_units, 3);
        assert_eq!(stored.expires_at, Some(later));
    }

    #[tokio::test]
    async fn expiry_boundary_and_share_cascade() {
        let store = InMemoryFileStore::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        let at_boundary = insert(&store, owner, 1).await;
        let future = insert(&store, owner, 1).await;
        let other_owner = insert(&store, Uuid::new_v4(), 1).await;
        store.set_expires_at(at_boundary.id, Some(now));
        store.set_expires_at(future.id, Some(now + Duration::milliseconds(1)));
        store.set_expires_at(other_owner.id, Some(now - Duration::days(1)));

        store.insert_share(Share::new(at_boundary.id, None)).await.unwrap();
        store.insert_share(Share::new(future.id, None)).await.unwrap();

        let deleted = store.delete_expired(owner, now).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].id, at_boundary.id);
        assert!(store.get(future.id).await.unwrap().is_some());
        assert!(store.get(other_owner.id).await.unwrap().is_some());
        assert_eq!(store.share_count(), 1);
    }

    #[tokio::test]
    async fn backfill_only_touches_missing_expiry() {
        let store = InMemoryFileStore::new();
        let owner = Uuid::new_v4();
        let retention = RetentionPolicy::default();
        let missing = insert(&store, owner, 1).await;
        let present = insert(&store, owner, 1).await;
        store.set_expires_at(missing.id, None);

        assert_eq!(store.backfill_expires_at(owner, &retention).await.unwrap(), 1);
        let filled = store.get(missing.id).await.unwrap().unwrap();
        assert_eq!(
            filled.expires_at,
            Some(retention.expires_at(filled.created_at, 1))
        );
        assert_eq!(
            store.get(present.id).await.unwrap().unwrap().expires_at,
            present.expires_at
        );
    }

    #[tokio::test]
    async fn list_is_scoped_newest_first() {
        let store = InMemoryFileStore::new();
        let owner = Uuid::new_v4();
        let first = insert(&store, owner, 1).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = insert(&store, owner, 1).await;
        insert(&store, Uuid::new_v4(), 1).await;

        let listed = store.list_by_owner(owner, 10, 0).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(store.list_by_owner(owner, 1, 1).await.unwrap()[0].id, first.id);
    }
}
