//! Background committer: moves one file from staging to the durable network.
//!
//! A commit runs claim, staging read, durable write, classification and a fenced
//! terminal write. Every terminal write is conditional on the claim token, so a
//! committer whose claim was reaped can never finalize the record.

use anyhow::{Context, Result};
use bytes::Bytes;
use ferry_core::models::{CommitRecord, FileRecord};
use ferry_core::{AppError, CommitPolicy};
use ferry_db::{ClaimLimits, ClaimOutcome, FileStore};
use ferry_storage::{DurableError, DurableStore, Storage, StorageError, WriteReceipt};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use uuid::Uuid;

/// Blob identifiers are 32 bytes in URL-safe base64 without padding.
const BLOB_ID_PATTERN: &str = r"(?:^|[^A-Za-z0-9_-])([A-Za-z0-9_-]{43})(?:$|[^A-Za-z0-9_-])";

/// Classified result of one durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Confirmed(WriteReceipt),
    /// The write errored but its error text names the identifier of stored content.
    Ambiguous(String),
    Failed(String),
}

/// What a single committer run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitReport {
    Completed { external_id: String },
    Failed { reason: String },
    AlreadyClaimed,
    AtCapacity,
    NotFound,
    /// The claim was reaped while the commit ran; nothing was written.
    LostClaim,
}

pub struct Committer {
    files: Arc<dyn FileStore>,
    staging: Arc<dyn Storage>,
    network: Arc<dyn DurableStore>,
    policy: CommitPolicy,
    limits: ClaimLimits,
    blob_id: Regex,
}

impl Committer {
    pub fn new(
        files: Arc<dyn FileStore>,
        staging: Arc<dyn Storage>,
        network: Arc<dyn DurableStore>,
        policy: CommitPolicy,
        limits: ClaimLimits,
    ) -> Result<Self> {
        let blob_id =
            Regex::new(BLOB_ID_PATTERN).context("Failed to compile blob identifier pattern")?;
        Ok(Self {
            files,
            staging,
            network,
            policy,
            limits,
            blob_id,
        })
    }

    pub fn policy(&self) -> &CommitPolicy {
        &self.policy
    }

    /// Identifier embedded in a durable write error, if any.
    pub fn extract_blob_id(&self, text: &str) -> Option<String> {
        self.blob_id
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Claim `file_id` and commit it. Errors are store failures only; commit
    /// failures are recorded on the file and reported.
    #[tracing::instrument(skip(self), fields(file_id = %file_id))]
    pub async fn run(&self, file_id: Uuid) -> Result<CommitReport> {
        let record = match self.files.claim(file_id, self.limits).await? {
            ClaimOutcome::Claimed(record) => record,
            ClaimOutcome::AlreadyClaimed => {
                tracing::debug!("File already claimed, skipping");
                return Ok(CommitReport::AlreadyClaimed);
            }
            ClaimOutcome::AtCapacity => {
                tracing::debug!("Concurrency cap reached, leaving file for next tick");
                return Ok(CommitReport::AtCapacity);
            }
            ClaimOutcome::NotFound => return Ok(CommitReport::NotFound),
        };
        let token = record
            .claim_token
            .context("Claimed record carries no claim token")?;

        let start = Instant::now();
        tracing::info!(
            owner_id = %record.owner_id,
            size_bytes = record.size_bytes,
            retention_units = record.retention_units,
            attempt = record.attempts,
            "Commit started"
        );

        let resolved = match self.read_staged(&record).await {
            Ok(data) => self.resolve(self.write(&record, data.clone()).await, &data).await,
            Err(reason) => Err(reason),
        };

        let report = match resolved {
            Ok(commit) => {
                if self.files.complete(file_id, token, &commit).await? {
                    tracing::info!(
                        external_id = %commit.external_id,
                        has_object_ref = commit.committed_object_ref.is_some(),
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "Commit completed"
                    );
                    CommitReport::Completed {
                        external_id: commit.external_id,
                    }
                } else {
                    self.lost_claim(file_id, "completed")
                }
            }
            Err(reason) => {
                if self.files.fail(file_id, token, &reason).await? {
                    tracing::warn!(
                        error = %AppError::CommitFailed(reason.clone()),
                        attempt = record.attempts,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "Commit failed, file left for retry"
                    );
                    CommitReport::Failed { reason }
                } else {
                    self.lost_claim(file_id, "failed")
                }
            }
        };

        Ok(report)
    }

    fn lost_claim(&self, file_id: Uuid, outcome: &str) -> CommitReport {
        let err = AppError::StaleClaim(format!(
            "claim on {} was revoked before it could be marked {}",
            file_id, outcome
        ));
        tracing::warn!(error = %err, "Discarding commit result");
        CommitReport::LostClaim
    }

    async fn read_staged(&self, record: &FileRecord) -> Result<Bytes, String> {
        let key = record
            .staging_key
            .as_deref()
            .ok_or_else(|| "no staged copy to commit".to_string())?;

        let data = match timeout(self.policy.staging_read_timeout, self.staging.get(key)).await {
            Ok(Ok(data)) => data,
            Ok(Err(StorageError::NotFound(_))) => {
                return Err(format!("staged content missing at {}", key))
            }
            Ok(Err(e)) => return Err(format!("staging read failed: {}", e)),
            Err(_) => {
                return Err(format!(
                    "staging read timed out after {}s",
                    self.policy.staging_read_timeout.as_secs()
                ))
            }
        };

        if data.len() as i64 != record.size_bytes {
            return Err(format!(
                "staged size {} does not match declared size {}",
                data.len(),
                record.size_bytes
            ));
        }

        if let Some(expected) = record.content_sha256.as_deref() {
            let actual = hex::encode(Sha256::digest(&data));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err("staged content does not match its checksum".to_string());
            }
        }
        Ok(data)
    }

    async fn write(&self, record: &FileRecord, data: Bytes) -> CommitOutcome {
        let limit = self.policy.write_timeout(record.retention_units);
        match timeout(limit, self.network.write(data, record.retention_units)).await {
            Ok(Ok(receipt)) => CommitOutcome::Confirmed(receipt),
            Ok(Err(e)) => self.classify_error(&e),
            Err(_) => CommitOutcome::Failed(format!(
                "durable write timed out after {}s",
                limit.as_secs()
            )),
        }
    }

    fn classify_error(&self, err: &DurableError) -> CommitOutcome {
        let text = err.to_string();
        match self.extract_blob_id(&text) {
            Some(id) => {
                tracing::warn!(
                    error = %AppError::CommitAmbiguous(text.clone()),
                    external_id = %id,
                    "Durable write errored with an identifier in its response"
                );
                CommitOutcome::Ambiguous(id)
            }
            None => CommitOutcome::Failed(text),
        }
    }

    async fn resolve(&self, outcome: CommitOutcome, staged: &Bytes) -> Result<CommitRecord, String> {
        match outcome {
            CommitOutcome::Confirmed(receipt) => Ok(CommitRecord {
                external_id: receipt.external_id,
                committed_object_ref: receipt.object_ref,
            }),
            CommitOutcome::Ambiguous(external_id) => {
                if self.policy.verify_ambiguous {
                    self.verify(&external_id, staged).await?;
                }
                Ok(CommitRecord {
                    external_id,
                    committed_object_ref: None,
                })
            }
            CommitOutcome::Failed(reason) => Err(reason),
        }
    }

    /// Read the content back and require it to equal the staged payload.
    async fn verify(&self, external_id: &str, staged: &Bytes) -> Result<(), String> {
        let read = timeout(self.policy.verify_timeout, self.network.read(external_id)).await;
        match read {
            Ok(Ok(stored)) if stored == *staged => Ok(()),
            Ok(Ok(_)) => Err(format!(
                "ambiguous write {} holds different content",
                external_id
            )),
            Ok(Err(e)) => Err(format!(
                "ambiguous write {} could not be verified: {}",
                external_id, e
            )),
            Err(_) => Err(format!(
                "ambiguous write {} could not be verified: read-back timed out",
                external_id
            )),
        }
    }
}
