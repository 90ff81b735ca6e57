//! Read path
//!
//! The staged copy wins while it exists. Otherwise the content is read from the
//! durable network, retrying with exponential backoff. Content that is committed but
//! not yet served by the network surfaces as a retryable `ReplicationDelay`.

use bytes::Bytes;
use ferry_core::models::FileRecord;
use ferry_core::{AppError, RetrievalPolicy};
use ferry_db::FileStore;
use ferry_storage::{DurableStore, Storage, StorageError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Staging,
    Durable,
}

#[derive(Debug, Clone)]
pub struct RetrievedFile {
    pub record: FileRecord,
    pub data: Bytes,
    pub source: ContentSource,
}

pub struct RetrievalService {
    files: Arc<dyn FileStore>,
    staging: Arc<dyn Storage>,
    network: Arc<dyn DurableStore>,
    policy: RetrievalPolicy,
}

impl RetrievalService {
    pub fn new(
        files: Arc<dyn FileStore>,
        staging: Arc<dyn Storage>,
        network: Arc<dyn DurableStore>,
        policy: RetrievalPolicy,
    ) -> Self {
        Self {
            files,
            staging,
            network,
            policy,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn fetch(&self, owner_id: Uuid, file_id: Uuid) -> Result<RetrievedFile, AppError> {
        let record = self
            .files
            .get_for_owner(owner_id, file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", file_id)))?;

        if let Some(data) = self.read_staged(&record).await? {
            return Ok(RetrievedFile {
                record,
                data,
                source: ContentSource::Staging,
            });
        }

        let Some(external_id) = record.external_id.clone() else {
            return Err(AppError::NotCommitted(format!(
                "File {} has not been committed yet",
                file_id
            )));
        };

        let data = self.read_durable(&external_id).await?;
        Ok(RetrievedFile {
            record,
            data,
            source: ContentSource::Durable,
        })
    }

    /// `Ok(None)` when there is no usable staged copy. A staging failure is only
    /// fatal when the durable network cannot stand in for it.
    async fn read_staged(&self, record: &FileRecord) -> Result<Option<Bytes>, AppError> {
        let Some(key) = record.staging_key.as_deref() else {
            return Ok(None);
        };
        match self.staging.get(key).await {
            Ok(data) => Ok(Some(data)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) if record.external_id.is_some() => {
                tracing::warn!(
                    error = %e,
                    file_id = %record.id,
                    "Staging read failed, falling back to the durable network"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_durable(&self, external_id: &str) -> Result<Bytes, AppError> {
        let start = Instant::now();
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 0..attempts {
            match self.network.read(external_id).await {
                Ok(data) => {
                    tracing::debug!(
                        external_id,
                        attempt,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "Read content from the durable network"
                    );
                    return Ok(data);
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(error = %e, external_id, "Durable read failed permanently");
                    return Err(e.into());
                }
                Err(e) => {
                    if attempt + 1 == attempts {
                        tracing::warn!(error = %e, external_id, attempts, "Durable read retries exhausted");
                        break;
                    }
                    let delay = self.policy.delay_for(attempt, e.is_not_yet_replicated());
                    tracing::debug!(
                        error = %e,
                        external_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Durable read failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(AppError::ReplicationDelay(format!(
            "content {} is still replicating",
            external_id
        )))
    }
}
