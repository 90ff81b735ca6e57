//! Stale-job reaper
//!
//! A committer can die between its claim and its terminal write. Without reaping,
//! the record and its concurrency slot would stay in `processing` forever.

use anyhow::Result;
use chrono::Utc;
use ferry_core::constants::STALE_CLAIM_REASON;
use ferry_db::FileStore;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct StaleJobReaper {
    files: Arc<dyn FileStore>,
    /// Must exceed the longest possible commit; `Config::validate` enforces it.
    stale_threshold: Duration,
}

impl StaleJobReaper {
    pub fn new(files: Arc<dyn FileStore>, stale_threshold: Duration) -> Self {
        Self {
            files,
            stale_threshold,
        }
    }

    /// Force every `processing` record older than the threshold to `failed`.
    #[tracing::instrument(skip(self), fields(stale_threshold_secs = self.stale_threshold.as_secs()))]
    pub async fn reap(&self) -> Result<Vec<Uuid>> {
        let threshold = chrono::Duration::from_std(self.stale_threshold)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(threshold)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let reaped = self.files.reap_stale(cutoff, STALE_CLAIM_REASON).await?;
        if !reaped.is_empty() {
            tracing::warn!(count = reaped.len(), file_ids = ?reaped, "Reaped stale claims");
        }
        Ok(reaped)
    }
}
