//! Staging janitor
//!
//! Completed records keep their staged copy for a grace window as a safety net.
//! Past that window the copy is deleted and the key cleared.

use anyhow::Result;
use chrono::Utc;
use ferry_db::FileStore;
use ferry_storage::Storage;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct StagingJanitor {
    files: Arc<dyn FileStore>,
    staging: Arc<dyn Storage>,
    grace: Duration,
    batch_size: i64,
}

impl StagingJanitor {
    pub fn new(
        files: Arc<dyn FileStore>,
        staging: Arc<dyn Storage>,
        grace: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            files,
            staging,
            grace,
            batch_size,
        }
    }

    /// Delete up to one batch of expired staging copies. Returns how many keys were
    /// cleared.
    #[tracing::instrument(skip(self), fields(cleanup.operation = "staging_grace"))]
    pub async fn run_once(&self) -> Result<usize> {
        let grace = chrono::Duration::from_std(self.grace).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(grace)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let candidates = self
            .files
            .staging_cleanup_candidates(cutoff, self.batch_size)
            .await?;

        let mut cleared = 0;
        for record in candidates {
            let Some(key) = record.staging_key.as_deref() else {
                continue;
            };

            if let Err(e) = self.staging.delete(key).await {
                tracing::error!(
                    error = %e,
                    file_id = %record.id,
                    staging_key = %key,
                    "Failed to delete staged copy, will retry next run"
                );
                continue;
            }

            match self.files.clear_staging_key(record.id, key).await {
                Ok(true) => cleared += 1,
                Ok(false) => {
                    tracing::debug!(file_id = %record.id, "Staging key changed concurrently")
                }
                Err(e) => {
                    tracing::error!(error = %e, file_id = %record.id, "Failed to clear staging key")
                }
            }
        }

        if cleared > 0 {
            tracing::info!(cleared, "Staging copies past grace window removed");
        }
        Ok(cleared)
    }
}
