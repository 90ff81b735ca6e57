//! Lazy expiration
//!
//! Expired files are not deleted on a schedule. Instead, every owner-scoped read
//! sweeps that owner's expired records first, so expired files are never listed.

use anyhow::Result;
use chrono::Utc;
use ferry_core::RetentionPolicy;
use ferry_db::FileStore;
use ferry_storage::Storage;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub struct ExpirationSweeper {
    files: Arc<dyn FileStore>,
    staging: Arc<dyn Storage>,
    retention: RetentionPolicy,
}

impl ExpirationSweeper {
    pub fn new(files: Arc<dyn FileStore>, staging: Arc<dyn Storage>, retention: RetentionPolicy) -> Self {
        Self {
            files,
            staging,
            retention,
        }
    }

    /// Backfill missing expiries, then delete every expired record of `owner_id`
    /// along with its shares. Staged copies are removed afterwards and a failed
    /// delete there is only logged; the janitor never sees these keys again, so
    /// such objects are left for the staging bucket's own lifecycle rules.
    ///
    /// Returns the number of records deleted.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, owner_id: Uuid) -> Result<usize> {
        let start = Instant::now();

        let backfilled = self.files.backfill_expires_at(owner_id, &self.retention).await?;
        if backfilled > 0 {
            tracing::info!(backfilled, "Backfilled missing expiry timestamps");
        }

        let expired = self.files.delete_expired(owner_id, Utc::now()).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        for record in &expired {
            let Some(key) = record.staging_key.as_deref() else {
                continue;
            };
            if let Err(e) = self.staging.delete(key).await {
                tracing::warn!(
                    error = %e,
                    file_id = %record.id,
                    staging_key = %key,
                    "Failed to delete staged copy of expired file"
                );
            }
        }

        tracing::info!(
            deleted = expired.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Expired files swept"
        );
        Ok(expired.len())
    }
}
