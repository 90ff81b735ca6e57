//! Presigned upload watcher
//!
//! A presigned ingestion creates its record before the client has sent any bytes.
//! The record carries an upload deadline and stays out of dispatch until the
//! watcher sees the staged object, or until the deadline passes and the commit is
//! left to report the missing content.

use anyhow::Result;
use chrono::Utc;
use ferry_db::FileStore;
use ferry_storage::Storage;
use std::sync::Arc;

#[derive(Clone)]
pub struct UploadWatcher {
    files: Arc<dyn FileStore>,
    staging: Arc<dyn Storage>,
    batch_size: i64,
}

impl UploadWatcher {
    pub fn new(files: Arc<dyn FileStore>, staging: Arc<dyn Storage>, batch_size: i64) -> Self {
        Self {
            files,
            staging,
            batch_size,
        }
    }

    /// Release records whose upload landed or whose window closed. Returns how many
    /// became dispatchable.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<usize> {
        let now = Utc::now();
        let waiting = self.files.awaiting_upload(self.batch_size).await?;

        let mut released = 0;
        for record in waiting {
            let Some(key) = record.staging_key.as_deref() else {
                continue;
            };

            let uploaded = match self.staging.exists(key).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        file_id = %record.id,
                        staging_key = %key,
                        "Failed to check staged upload, will retry next run"
                    );
                    continue;
                }
            };
            let window_closed = record.upload_deadline.is_some_and(|at| at <= now);
            if !uploaded && !window_closed {
                continue;
            }

            if self.files.mark_uploaded(record.id).await? {
                released += 1;
                if uploaded {
                    tracing::debug!(file_id = %record.id, "Presigned upload received");
                } else {
                    tracing::warn!(
                        file_id = %record.id,
                        staging_key = %key,
                        "Presigned upload window closed without content"
                    );
                }
            }
        }

        if released > 0 {
            tracing::info!(released, "Presigned uploads released for commit");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::{DateTime, Duration};
    use ferry_core::models::{FileRecord, NewFile};
    use ferry_db::InMemoryFileStore;
    use ferry_storage::test_helpers::MockStorage;
    use uuid::Uuid;

    async fn presigned(files: &InMemoryFileStore, deadline: DateTime<Utc>) -> FileRecord {
        let id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        files
            .insert(
                NewFile {
                    id,
                    placeholder_id: id.to_string(),
                    staging_key: ferry_storage::staging_key(owner_id, id),
                    owner_id,
                    filename: "direct.bin".to_string(),
                    content_type: "application/octet-stream".to_string(),
                    size_bytes: 4,
                    content_sha256: None,
                    encrypted: false,
                    retention_units: 1,
                    created_at: Utc::now(),
                    upload_deadline: Some(deadline),
                },
                Utc::now() + Duration::days(14),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn releases_once_bytes_are_staged() {
        let files = Arc::new(InMemoryFileStore::new());
        let staging = Arc::new(MockStorage::new());
        let record = presigned(&files, Utc::now() + Duration::minutes(15)).await;
        let watcher = UploadWatcher::new(files.clone(), staging.clone(), 50);

        assert_eq!(watcher.run_once().await.unwrap(), 0);
        assert!(files.get(record.id).await.unwrap().unwrap().awaiting_upload());

        staging.set_file(record.staging_key.as_deref().unwrap(), Bytes::from_static(b"data"));
        assert_eq!(watcher.run_once().await.unwrap(), 1);
        assert!(!files.get(record.id).await.unwrap().unwrap().awaiting_upload());
    }

    #[tokio::test]
    async fn releases_after_window_closes() {
        let files = Arc::new(InMemoryFileStore::new());
        let staging = Arc::new(MockStorage::new());
        let record = presigned(&files, Utc::now() - Duration::seconds(1)).await;
        let watcher = UploadWatcher::new(files.clone(), staging, 50);

        assert_eq!(watcher.run_once().await.unwrap(), 1);
        assert_eq!(files.get(record.id).await.unwrap().unwrap().upload_deadline, None);
    }
}
