use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::models::{CommitRecord, FileRecord, FileStatus, NewFile, Share};
use ferry_core::RetentionPolicy;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::store::{CandidateQuery, ClaimLimits, ClaimOutcome, FileStore, InFlightCounts};

const FILE_COLUMNS: &str = "id, placeholder_id, external_id, committed_object_ref, staging_key, \
     owner_id, filename, content_type, size_bytes, content_sha256, encrypted, retention_units, \
     status, claim_token, attempts, last_error, created_at, last_status_at, committed_at, expires_at, \
     upload_deadline";

/// Advisory lock serializing capped claims across processes.
pub const CLAIM_LOCK_KEY: i64 = 0x6665_7272_7963_6c6d;

#[derive(Clone)]
pub struct FileRepository {
    pool: PgPool,
}

impl FileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl FileStore for FileRepository {
    #[tracing::instrument(skip(self, new), fields(file_id = %new.id, owner_id = %new.owner_id))]
    async fn insert(&self, new: NewFile, expires_at: DateTime<Utc>) -> Result<FileRecord> {
        let sql = format!(
            r#"
            INSERT INTO files (
                id, placeholder_id, staging_key, owner_id, filename, content_type,
                size_bytes, content_sha256, encrypted, retention_units, status,
                created_at, last_status_at, expires_at, upload_deadline
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11, $11, $12, $13)
            RETURNING {}
            "#,
            FILE_COLUMNS
        );

        let record = sqlx::query_as::<Postgres, FileRecord>(&sql)
            .bind(new.id)
            .bind(&new.placeholder_id)
            .bind(&new.staging_key)
            .bind(new.owner_id)
            .bind(&new.filename)
            .bind(&new.content_type)
            .bind(new.size_bytes)
            .bind(&new.content_sha256)
            .bind(new.encrypted)
            .bind(new.retention_units)
            .bind(new.created_at)
            .bind(expires_at)
            .bind(new.upload_deadline)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert file record")?;

        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {} FROM files WHERE id = $1", FILE_COLUMNS);
        sqlx::query_as::<Postgres, FileRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch file record")
    }

    async fn get_for_owner(&self, owner_id: Uuid, id: Uuid) -> Result<Option<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files WHERE id = $1 AND owner_id = $2",
            FILE_COLUMNS
        );
        sqlx::query_as::<Postgres, FileRecord>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch file record")
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM files
            WHERE owner_id = $1
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
            FILE_COLUMNS
        );
        sqlx::query_as::<Postgres, FileRecord>(&sql)
            .bind(owner_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list files")
    }

    /// The cap check and the status change happen in one statement under a
    /// transaction-scoped advisory lock, so overlapping dispatchers cannot push
    /// `processing` above the caps. The claim is stamped with the wall clock after
    /// the lock is granted, not the transaction start.
    #[tracing::instrument(skip(self))]
    async fn claim(&self, id: Uuid, limits: ClaimLimits) -> Result<ClaimOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CLAIM_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .context("Failed to acquire claim lock")?;

        let sql = format!(
            r#"
            UPDATE files
            SET status = 'processing',
                claim_token = $2,
                attempts = attempts + 1,
                last_status_at = clock_timestamp()
            WHERE id = $1
                AND status IN ('pending', 'failed')
                AND (SELECT COUNT(*) FROM files WHERE status = 'processing') < $3
                AND (
                    SELECT COUNT(*) FROM files busy
                    WHERE busy.status = 'processing' AND busy.owner_id = files.owner_id
                ) < $4
            RETURNING {}
            "#,
            FILE_COLUMNS
        );

        let claimed: Option<FileRecord> = sqlx::query_as::<Postgres, FileRecord>(&sql)
            .bind(id)
            .bind(Uuid::new_v4())
            .bind(limits.max_global)
            .bind(limits.max_per_owner)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to claim file")?;

        let outcome = match claimed {
            Some(record) => ClaimOutcome::Claimed(record),
            None => {
                let status: Option<FileStatus> =
                    sqlx::query_scalar("SELECT status FROM files WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&mut *tx)
                        .await
                        .context("Failed to read file status")?;
                match status {
                    None => ClaimOutcome::NotFound,
                    Some(status) if status.is_claimable() => ClaimOutcome::AtCapacity,
                    Some(_) => ClaimOutcome::AlreadyClaimed,
                }
            }
        };

        tx.commit().await.context("Failed to commit transaction")?;

        Ok(outcome)
    }

    #[tracing::instrument(skip(self, commit), fields(external_id = %commit.external_id))]
    async fn complete(&self, id: Uuid, claim_token: Uuid, commit: &CommitRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET status = 'completed',
                external_id = $3,
                committed_object_ref = $4,
                committed_at = clock_timestamp(),
                last_status_at = clock_timestamp(),
                last_error = NULL
            WHERE id = $1
                AND status = 'processing'
                AND claim_token = $2
                AND external_id IS NULL
            "#,
        )
        .bind(id)
        .bind(claim_token)
        .bind(&commit.external_id)
        .bind(&commit.committed_object_ref)
        .execute(&self.pool)
        .await
        .context("Failed to mark file completed")?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn fail(&self, id: Uuid, claim_token: Uuid, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET status = 'failed',
                last_error = $3,
                last_status_at = clock_timestamp()
            WHERE id = $1
                AND status = 'processing'
                AND claim_token = $2
            "#,
        )
        .bind(id)
        .bind(claim_token)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to mark file failed")?;

        Ok(result.rows_affected() == 1)
    }

    async fn reap_stale(&self, cutoff: DateTime<Utc>, reason: &str) -> Result<Vec<Uuid>> {
        sqlx::query_scalar(
            r#"
            UPDATE files
            SET status = 'failed',
                claim_token = NULL,
                last_error = $2,
                last_status_at = clock_timestamp()
            WHERE status = 'processing'
                AND last_status_at < $1
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .bind(reason)
        .fetch_all(&self.pool)
        .await
        .context("Failed to reap stale claims")
    }

    async fn in_flight(&self) -> Result<InFlightCounts> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT owner_id, COUNT(*)
            FROM files
            WHERE status = 'processing'
            GROUP BY owner_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count in-flight files")?;

        let mut counts = InFlightCounts::default();
        for (owner_id, count) in rows {
            let count = count.max(0) as usize;
            counts.global += count;
            counts.per_owner.insert(owner_id, count);
        }
        Ok(counts)
    }

    async fn dispatch_candidates(&self, query: CandidateQuery) -> Result<Vec<FileRecord>> {
        let sql = format!(
            r#"
            (SELECT {cols} FROM files
                WHERE status = 'pending' AND upload_deadline IS NULL AND size_bytes < $1
                ORDER BY size_bytes ASC, created_at ASC, id
                LIMIT $2)
            UNION ALL
            (SELECT {cols} FROM files
                WHERE status = 'pending' AND upload_deadline IS NULL AND size_bytes >= $1
                ORDER BY size_bytes ASC, created_at ASC, id
                LIMIT $2)
            UNION ALL
            (SELECT {cols} FROM files
                WHERE status = 'failed' AND attempts < $3
                ORDER BY size_bytes ASC, created_at ASC, id
                LIMIT $2)
            "#,
            cols = FILE_COLUMNS
        );

        sqlx::query_as::<Postgres, FileRecord>(&sql)
            .bind(query.small_file_threshold_bytes)
            .bind(query.scan_limit)
            .bind(query.max_attempts)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch dispatch candidates")
    }

    async fn awaiting_upload(&self, limit: i64) -> Result<Vec<FileRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM files
            WHERE status = 'pending' AND upload_deadline IS NOT NULL
            ORDER BY created_at ASC, id
            LIMIT $1
            "#,
            FILE_COLUMNS
        );
        sqlx::query_as::<Postgres, FileRecord>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch files awaiting upload")
    }

    async fn mark_uploaded(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET upload_deadline = NULL
            WHERE id = $1 AND status = 'pending' AND upload_deadline IS NOT NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to release uploaded file")?;

        Ok(result.rows_affected() == 1)
    }

    async fn backfill_expires_at(
        &self,
        owner_id: Uuid,
        retention: &RetentionPolicy,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET expires_at = created_at
                + (LEAST(GREATEST(retention_units, 0), $2)::BIGINT * $3) * INTERVAL '1 millisecond'
            WHERE owner_id = $1 AND expires_at IS NULL
            "#,
        )
        .bind(owner_id)
        .bind(retention.max_units)
        .bind(retention.epoch_duration_ms)
        .execute(&self.pool)
        .await
        .context("Failed to backfill expires_at")?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_expired(&self, owner_id: Uuid, now: DateTime<Utc>) -> Result<Vec<FileRecord>> {
        let sql = format!(
            r#"
            DELETE FROM files
            WHERE owner_id = $1
                AND expires_at IS NOT NULL
                AND expires_at <= $2
            RETURNING {}
            "#,
            FILE_COLUMNS
        );
        sqlx::query_as::<Postgres, FileRecord>(&sql)
            .bind(owner_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .context("Failed to delete expired files")
    }

    async fn staging_cleanup_candidates(
        &self,
        committed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FileRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM files
            WHERE status = 'completed'
                AND staging_key IS NOT NULL
                AND committed_at < $1
            ORDER BY committed_at ASC
            LIMIT $2
            "#,
            FILE_COLUMNS
        );
        sqlx::query_as::<Postgres, FileRecord>(&sql)
            .bind(committed_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch staging cleanup candidates")
    }

    async fn clear_staging_key(&self, id: Uuid, staging_key: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET staging_key = NULL WHERE id = $1 AND staging_key = $2",
        )
        .bind(id)
        .bind(staging_key)
        .execute(&self.pool)
        .await
        .context("Failed to clear staging key")?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_retention(
        &self,
        id: Uuid,
        expected_units: i32,
        retention_units: i32,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET retention_units = $3, expires_at = $4
            WHERE id = $1 AND status = 'completed' AND retention_units = $2
            "#,
        )
        .bind(id)
        .bind(expected_units)
        .bind(retention_units)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("Failed to update retention")?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_share(&self, share: Share) -> Result<Share> {
        sqlx::query_as::<Postgres, Share>(
            r#"
            INSERT INTO shares (id, file_id, expires_at, revoked, download_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, file_id, expires_at, revoked, download_count, created_at
            "#,
        )
        .bind(share.id)
        .bind(share.file_id)
        .bind(share.expires_at)
        .bind(share.revoked)
        .bind(share.download_count)
        .bind(share.created_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert share")
    }

    async fn list_shares(&self, file_id: Uuid) -> Result<Vec<Share>> {
        sqlx::query_as::<Postgres, Share>(
            r#"
            SELECT id, file_id, expires_at, revoked, download_count, created_at
            FROM shares
            WHERE file_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list shares")
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }
}
