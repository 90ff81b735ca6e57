//! Retention extension for committed files.

use ferry_core::models::{FileRecord, FileStatus};
use ferry_core::{AppError, RetentionPolicy};
use ferry_db::FileStore;
use ferry_storage::DurableStore;
use std::sync::Arc;
use uuid::Uuid;

pub struct RetentionService {
    files: Arc<dyn FileStore>,
    network: Arc<dyn DurableStore>,
    retention: RetentionPolicy,
}

impl RetentionService {
    pub fn new(files: Arc<dyn FileStore>, network: Arc<dyn DurableStore>, retention: RetentionPolicy) -> Self {
        Self {
            files,
            network,
            retention,
        }
    }

    /// Reserve the new retention on the record, then buy `additional_units` more
    /// epochs on the network. The record update is conditional on the units read, so
    /// concurrent extensions either stack or fail with a conflict. A network failure
    /// puts the previous retention back.
    #[tracing::instrument(skip(self))]
    pub async fn extend(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
        additional_units: i32,
    ) -> Result<FileRecord, AppError> {
        if additional_units < 1 {
            return Err(AppError::InvalidInput(
                "additional_units must be at least 1".to_string(),
            ));
        }

        let record = self
            .files
            .get_for_owner(owner_id, file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", file_id)))?;

        if record.status != FileStatus::Completed {
            return Err(AppError::Conflict(format!(
                "File {} is {} and cannot be extended until it is committed",
                file_id, record.status
            )));
        }
        let Some(object_ref) = record.committed_object_ref.as_deref() else {
            return Err(AppError::Conflict(format!(
                "File {} has no network object handle to extend",
                file_id
            )));
        };

        let total_units = record.retention_units.saturating_add(additional_units);
        if total_units > self.retention.max_units {
            return Err(AppError::InvalidInput(format!(
                "Total retention of {} units exceeds the maximum of {}",
                total_units, self.retention.max_units
            )));
        }

        let expires_at = self.retention.expires_at(record.created_at, total_units);
        if !self
            .files
            .update_retention(file_id, record.retention_units, total_units, expires_at)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "Retention of file {} changed while extending, retry the request",
                file_id
            )));
        }

        if let Err(e) = self.network.extend(object_ref, additional_units).await {
            self.restore(&record, total_units).await;
            return Err(e.into());
        }

        tracing::info!(
            file_id = %file_id,
            retention_units = total_units,
            expires_at = %expires_at,
            "Retention extended"
        );

        Ok(FileRecord {
            retention_units: total_units,
            expires_at: Some(expires_at),
            ..record
        })
    }

    async fn restore(&self, record: &FileRecord, reserved_units: i32) {
        let previous_expiry = record
            .expires_at
            .unwrap_or_else(|| self.retention.expires_at(record.created_at, record.retention_units));
        match self
            .files
            .update_retention(record.id, reserved_units, record.retention_units, previous_expiry)
            .await
        {
            Ok(true) => {
                tracing::warn!(file_id = %record.id, "Network extension failed, retention restored")
            }
            Ok(false) => tracing::error!(
                file_id = %record.id,
                reserved_units,
                "Network extension failed and retention moved on, record overstates network retention"
            ),
            Err(e) => tracing::error!(
                error = %e,
                file_id = %record.id,
                "Network extension failed and retention could not be restored"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use ferry_core::models::{CommitRecord, NewFile};
    use ferry_db::{ClaimLimits, ClaimOutcome, InMemoryFileStore};
    use ferry_storage::test_helpers::MockNetwork;

    async fn committed(
        files: &InMemoryFileStore,
        owner_id: Uuid,
        object_ref: Option<&str>,
    ) -> FileRecord {
        let id = Uuid::new_v4();
        files
            .insert(
                NewFile {
                    id,
                    placeholder_id: format!("pending_{}", id.simple()),
                    staging_key: format!("staging/{}/{}", owner_id, id),
                    owner_id,
                    filename: "archive.tar".to_string(),
                    content_type: "application/x-tar".to_string(),
                    size_bytes: 10,
                    content_sha256: None,
                    encrypted: false,
                    retention_units: 2,
                    created_at: Utc::now(),
                    upload_deadline: None,
                },
                Utc::now() + Duration::days(28),
            )
            .await
            .unwrap();
        let ClaimOutcome::Claimed(claimed) = files.claim(id, ClaimLimits::unbounded()).await.unwrap()
        else {
            panic!("expected claim");
        };
        let commit = CommitRecord {
            external_id: "D".repeat(43),
            committed_object_ref: object_ref.map(str::to_string),
        };
        files
            .complete(id, claimed.claim_token.unwrap(), &commit)
            .await
            .unwrap();
        files.get(id).await.unwrap().unwrap()
    }

    fn service(files: Arc<InMemoryFileStore>, network: Arc<MockNetwork>) -> RetentionService {
        RetentionService::new(files, network, RetentionPolicy::default())
    }

    #[tokio::test]
    async fn extend_updates_units_and_expiry() {
        let files = Arc::new(InMemoryFileStore::new());
        let network = Arc::new(MockNetwork::new());
        let owner = Uuid::new_v4();
        let record = committed(&files, owner, Some("0xabc")).await;

        let updated = service(files.clone(), network.clone())
            .extend(owner, record.id, 3)
            .await
            .unwrap();
        assert_eq!(updated.retention_units, 5);
        let expected = RetentionPolicy::default().expires_at(record.created_at, 5);
        assert_eq!(updated.expires_at, Some(expected));
        assert_eq!(files.get(record.id).await.unwrap().unwrap().expires_at, Some(expected));
        assert_eq!(network.extensions(), vec![("0xabc".to_string(), 3)]);
    }

    #[tokio::test]
    async fn extend_requires_object_ref() {
        let files = Arc::new(InMemoryFileStore::new());
        let network = Arc::new(MockNetwork::new());
        let owner = Uuid::new_v4();
        let record = committed(&files, owner, None).await;

        let err = service(files, network.clone())
            .extend(owner, record.id, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(network.extensions().is_empty());
    }

    #[tokio::test]
    async fn extend_rejects_exceeding_max_units() {
        let files = Arc::new(InMemoryFileStore::new());
        let network = Arc::new(MockNetwork::new());
        let owner = Uuid::new_v4();
        let record = committed(&files, owner, Some("0xabc")).await;

        let err = service(files, network.clone())
            .extend(owner, record.id, 52)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(network.extensions().is_empty());
    }

    #[tokio::test]
    async fn concurrent_extensions_match_network() {
        let files = Arc::new(InMemoryFileStore::new());
        let network = Arc::new(MockNetwork::new());
        network.set_extend_delay(Some(std::time::Duration::from_millis(20)));
        let owner = Uuid::new_v4();
        let record = committed(&files, owner, Some("0xabc")).await;
        let retention = service(files.clone(), network.clone());

        let (first, second) = tokio::join!(
            retention.extend(owner, record.id, 2),
            retention.extend(owner, record.id, 2)
        );

        let bought: i32 = network.extensions().iter().map(|(_, units)| units).sum();
        let stored = files.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.retention_units, record.retention_units + bought);
        assert_eq!(
            stored.expires_at,
            Some(RetentionPolicy::default().expires_at(record.created_at, stored.retention_units))
        );
        for result in [first, second] {
            match result {
                Ok(updated) => assert!(updated.retention_units <= stored.retention_units),
                Err(err) => assert!(matches!(err, AppError::Conflict(_))),
            }
        }
    }

    #[tokio::test]
    async fn failed_network_extension_restores_retention() {
        let files = Arc::new(InMemoryFileStore::new());
        let network = Arc::new(MockNetwork::new());
        network.fail_extends(true);
        let owner = Uuid::new_v4();
        let record = committed(&files, owner, Some("0xabc")).await;

        let result = service(files.clone(), network.clone())
            .extend(owner, record.id, 3)
            .await;
        assert!(result.is_err());

        let stored = files.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.retention_units, record.retention_units);
        assert_eq!(stored.expires_at, record.expires_at);
        assert!(network.extensions().is_empty());
    }
}
