//! Ingestion gateway
//!
//! Validates a payload, reserves payment, stages the bytes and creates the
//! `pending` record, then returns without waiting for the commit. A failed
//! ingestion leaves neither a staged object nor a record behind, and its
//! reservation is released.

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use ferry_core::models::{FileRecord, NewFile};
use ferry_core::{AppError, RetentionPolicy, StorageBackend};
use ferry_db::FileStore;
use ferry_storage::{staging_key, Storage};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::payment::{PaymentGate, Reservation};

const MAX_FILENAME_LENGTH: usize = 255;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One upload as received from the caller.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub owner_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
    pub encrypted: bool,
    /// Falls back to the deployment default.
    pub retention_units: Option<i32>,
}

/// A client-direct upload announced ahead of the bytes.
#[derive(Debug, Clone)]
pub struct PresignRequest {
    pub owner_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub encrypted: bool,
    pub retention_units: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct PresignedIngest {
    pub record: FileRecord,
    pub upload_url: String,
    pub expires_in: Duration,
}

/// Keep only the final path component and replace anything outside
/// `[A-Za-z0-9._-]`.
pub fn sanitize_filename(filename: &str) -> Result<String, AppError> {
    let filename_only = std::path::Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    if filename_only.contains("..") {
        return Err(AppError::InvalidInput(
            "Filename contains invalid path traversal".to_string(),
        ));
    }

    let sanitized: String = filename_only
        .chars()
        .take(MAX_FILENAME_LENGTH)
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches('_').is_empty() {
        return Ok("file".to_string());
    }
    Ok(sanitized)
}

/// Strip MIME parameters ("text/plain; charset=utf-8" -> "text/plain").
fn normalize_content_type(content_type: &str) -> String {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    if essence.is_empty() {
        DEFAULT_CONTENT_TYPE.to_string()
    } else {
        essence.to_lowercase()
    }
}

fn placeholder_id() -> String {
    format!("pending_{}", Uuid::new_v4().simple())
}

pub struct IngestionGateway {
    files: Arc<dyn FileStore>,
    staging: Arc<dyn Storage>,
    payments: Arc<dyn PaymentGate>,
    retention: RetentionPolicy,
    max_file_size_bytes: usize,
    presign_ttl: Duration,
}

impl IngestionGateway {
    pub fn new(
        files: Arc<dyn FileStore>,
        staging: Arc<dyn Storage>,
        payments: Arc<dyn PaymentGate>,
        retention: RetentionPolicy,
        max_file_size_bytes: usize,
        presign_ttl: Duration,
    ) -> Self {
        Self {
            files,
            staging,
            payments,
            retention,
            max_file_size_bytes,
            presign_ttl,
        }
    }

    fn validate_size(&self, size_bytes: usize) -> Result<(), AppError> {
        if size_bytes == 0 {
            return Err(AppError::InvalidInput("File is empty".to_string()));
        }
        if size_bytes > self.max_file_size_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "File size exceeds maximum allowed size of {} MB",
                self.max_file_size_bytes / 1024 / 1024
            )));
        }
        Ok(())
    }

    fn retention_units(&self, requested: Option<i32>) -> Result<i32, AppError> {
        let units = requested.unwrap_or(self.retention.default_units);
        if !self.retention.is_valid_request(units) {
            return Err(AppError::InvalidInput(format!(
                "retention_units must be between 1 and {}",
                self.retention.max_units
            )));
        }
        Ok(units)
    }

    /// Stage `request.data` and create its `pending` record.
    #[tracing::instrument(
        skip(self, request),
        fields(owner_id = %request.owner_id, size_bytes = request.data.len())
    )]
    pub async fn ingest(&self, request: IngestRequest) -> Result<FileRecord, AppError> {
        let start = Instant::now();
        self.validate_size(request.data.len())?;
        let retention_units = self.retention_units(request.retention_units)?;
        let filename = sanitize_filename(&request.filename)?;
        let content_type = normalize_content_type(&request.content_type);
        let size_bytes = request.data.len() as i64;

        let reservation = self
            .payments
            .reserve(request.owner_id, size_bytes, retention_units)
            .await?;

        let id = Uuid::new_v4();
        let key = staging_key(request.owner_id, id);
        let checksum = hex::encode(Sha256::digest(&request.data));

        if let Err(e) = self.staging.put(&key, request.data, &content_type).await {
            tracing::error!(error = %e, staging_key = %key, "Failed to stage upload");
            self.payments.release(&reservation).await;
            return Err(e.into());
        }

        let new = NewFile {
            id,
            placeholder_id: placeholder_id(),
            staging_key: key,
            owner_id: request.owner_id,
            filename,
            content_type,
            size_bytes,
            content_sha256: Some(checksum),
            encrypted: request.encrypted,
            retention_units,
            created_at: Utc::now(),
            upload_deadline: None,
        };
        let record = self.create_record(new, &reservation, true).await?;

        tracing::info!(
            file_id = %record.id,
            placeholder_id = %record.placeholder_id,
            retention_units,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "File staged and queued for commit"
        );
        Ok(record)
    }

    /// Create the `pending` record for a client-direct upload and hand back a
    /// presigned URL for the staging key. The record is held out of dispatch until
    /// the bytes land or the URL expires, and the bytes are checked at commit time.
    #[tracing::instrument(skip(self, request), fields(owner_id = %request.owner_id))]
    pub async fn ingest_presigned(&self, request: PresignRequest) -> Result<PresignedIngest, AppError> {
        if self.staging.backend_type() != StorageBackend::S3 {
            return Err(AppError::InvalidInput(
                "Presigned uploads require the S3 staging backend".to_string(),
            ));
        }
        let declared = usize::try_from(request.size_bytes)
            .map_err(|_| AppError::InvalidInput("file_size must be positive".to_string()))?;
        self.validate_size(declared)?;
        let retention_units = self.retention_units(request.retention_units)?;
        let filename = sanitize_filename(&request.filename)?;
        let content_type = normalize_content_type(&request.content_type);

        let reservation = self
            .payments
            .reserve(request.owner_id, request.size_bytes, retention_units)
            .await?;

        let id = Uuid::new_v4();
        let key = staging_key(request.owner_id, id);
        let now = Utc::now();
        let upload_deadline = now + ChronoDuration::seconds(self.presign_ttl.as_secs() as i64);
        let upload_url = match self
            .staging
            .presigned_put_url(&key, &content_type, self.presign_ttl)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, staging_key = %key, "Failed to presign upload");
                self.payments.release(&reservation).await;
                return Err(e.into());
            }
        };

        let new = NewFile {
            id,
            placeholder_id: placeholder_id(),
            staging_key: key,
            owner_id: request.owner_id,
            filename,
            content_type,
            size_bytes: request.size_bytes,
            content_sha256: None,
            encrypted: request.encrypted,
            retention_units,
            created_at: now,
            upload_deadline: Some(upload_deadline),
        };
        let record = self.create_record(new, &reservation, false).await?;

        tracing::info!(
            file_id = %record.id,
            expires_in_secs = self.presign_ttl.as_secs(),
            "Presigned staging upload issued"
        );
        Ok(PresignedIngest {
            record,
            upload_url,
            expires_in: self.presign_ttl,
        })
    }

    /// Release a presigned record for commit once its bytes are in staging.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_upload(&self, owner_id: Uuid, file_id: Uuid) -> Result<FileRecord, AppError> {
        let record = self
            .files
            .get_for_owner(owner_id, file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", file_id)))?;

        if !record.awaiting_upload() {
            return Err(AppError::Conflict(format!(
                "File {} is not awaiting an upload",
                file_id
            )));
        }
        if record.upload_deadline.is_some_and(|at| at <= Utc::now()) {
            return Err(AppError::InvalidInput(
                "Upload window has expired".to_string(),
            ));
        }

        let key = record
            .staging_key
            .as_deref()
            .ok_or_else(|| AppError::Internal(format!("File {} has no staging key", file_id)))?;
        if !self.staging.exists(key).await? {
            return Err(AppError::NotFound(format!(
                "No upload found in staging for file {}",
                file_id
            )));
        }

        if !self.files.mark_uploaded(file_id).await? {
            return Err(AppError::Conflict(format!(
                "File {} is not awaiting an upload",
                file_id
            )));
        }
        tracing::info!(file_id = %file_id, "Presigned upload confirmed");

        Ok(FileRecord {
            upload_deadline: None,
            ..record
        })
    }

    async fn create_record(
        &self,
        new: NewFile,
        reservation: &Reservation,
        staged: bool,
    ) -> Result<FileRecord, AppError> {
        let key = new.staging_key.clone();
        let expires_at = self
            .retention
            .expires_at(new.created_at, new.retention_units);

        match self.files.insert(new, expires_at).await {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::error!(error = %e, "Failed to create file record");
                if staged {
                    if let Err(cleanup) = self.staging.delete(&key).await {
                        tracing::warn!(
                            error = %cleanup,
                            staging_key = %key,
                            "Failed to remove orphaned staged object"
                        );
                    }
                }
                self.payments.release(reservation).await;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::NoopPaymentGate;
    use async_trait::async_trait;
    use ferry_core::models::FileStatus;
    use ferry_core::ErrorMetadata;
    use ferry_db::InMemoryFileStore;
    use ferry_storage::test_helpers::MockStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingGate {
        reserved: AtomicUsize,
        released: AtomicUsize,
        refuse: bool,
    }

    #[async_trait]
    impl PaymentGate for CountingGate {
        async fn reserve(
            &self,
            owner_id: Uuid,
            size_bytes: i64,
            retention_units: i32,
        ) -> Result<Reservation, AppError> {
            if self.refuse {
                return Err(AppError::PaymentRequired("balance too low".to_string()));
            }
            self.reserved.fetch_add(1, Ordering::SeqCst);
            NoopPaymentGate
                .reserve(owner_id, size_bytes, retention_units)
                .await
        }

        async fn release(&self, _reservation: &Reservation) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn gateway(
        staging: Arc<MockStorage>,
        payments: Arc<CountingGate>,
    ) -> (IngestionGateway, Arc<InMemoryFileStore>) {
        let files = Arc::new(InMemoryFileStore::new());
        let gateway = IngestionGateway::new(
            files.clone(),
            staging,
            payments,
            RetentionPolicy::default(),
            1024,
            Duration::from_secs(900),
        );
        (gateway, files)
    }

    fn request(data: &'static [u8]) -> IngestRequest {
        IngestRequest {
            owner_id: Uuid::new_v4(),
            filename: "../../etc/report final.pdf".to_string(),
            content_type: "Application/PDF; charset=binary".to_string(),
            data: Bytes::from_static(data),
            encrypted: true,
            retention_units: Some(3),
        }
    }

    #[tokio::test]
    async fn ingest_stages_and_creates_pending_record() {
        let staging = Arc::new(MockStorage::new());
        let (gateway, files) = gateway(staging.clone(), Arc::default());

        let record = gateway.ingest(request(b"%PDF-1.7")).await.unwrap();
        assert_eq!(record.status, FileStatus::Pending);
        assert_eq!(record.filename, "report_final.pdf");
        assert_eq!(record.content_type, "application/pdf");
        assert!(record.encrypted);
        assert!(record.placeholder_id.starts_with("pending_"));
        assert_eq!(
            record.expires_at,
            Some(RetentionPolicy::default().expires_at(record.created_at, 3))
        );

        let key = record.staging_key.clone().unwrap();
        assert_eq!(key, staging_key(record.owner_id, record.id));
        assert_eq!(staging.get_file(&key).unwrap(), Bytes::from_static(b"%PDF-1.7"));
        assert!(files.get(record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized_payloads() {
        let (gateway, files) = gateway(Arc::new(MockStorage::new()), Arc::default());

        let err = gateway.ingest(request(b"")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let err = gateway.ingest(request(&[0u8; 2048])).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));
        assert_eq!(err.http_status_code(), 413);
        assert!(files.all().is_empty());
    }

    #[tokio::test]
    async fn rejects_out_of_range_retention() {
        let (gateway, _) = gateway(Arc::new(MockStorage::new()), Arc::default());
        let mut req = request(b"x");
        req.retention_units = Some(0);
        assert!(matches!(
            gateway.ingest(req).await.unwrap_err(),
            AppError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn staging_failure_releases_reservation() {
        let staging = Arc::new(MockStorage::new());
        staging.fail_puts(true);
        let payments = Arc::new(CountingGate::default());
        let (gateway, files) = gateway(staging.clone(), payments.clone());

        let err = gateway.ingest(request(b"bytes")).await.unwrap_err();
        assert!(matches!(err, AppError::Staging(_)));
        assert!(err.is_recoverable());
        assert_eq!(payments.reserved.load(Ordering::SeqCst), 1);
        assert_eq!(payments.released.load(Ordering::SeqCst), 1);
        assert!(files.all().is_empty());
        assert_eq!(staging.file_count(), 0);
    }

    #[tokio::test]
    async fn refused_payment_stages_nothing() {
        let staging = Arc::new(MockStorage::new());
        let payments = Arc::new(CountingGate {
            refuse: true,
            ..CountingGate::default()
        });
        let (gateway, _) = gateway(staging.clone(), payments);

        let err = gateway.ingest(request(b"bytes")).await.unwrap_err();
        assert!(matches!(err, AppError::PaymentRequired(_)));
        assert_eq!(staging.file_count(), 0);
    }

    #[tokio::test]
    async fn presign_requires_s3_backend() {
        let (gateway, _) = gateway(Arc::new(MockStorage::new()), Arc::default());
        let err = gateway
            .ingest_presigned(PresignRequest {
                owner_id: Uuid::new_v4(),
                filename: "big.iso".to_string(),
                content_type: "application/octet-stream".to_string(),
                size_bytes: 100,
                encrypted: false,
                retention_units: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn presign_creates_pending_record() {
        let staging = Arc::new(MockStorage::with_backend(StorageBackend::S3));
        let (gateway, files) = gateway(staging, Arc::default());

        let presigned = gateway
            .ingest_presigned(PresignRequest {
                owner_id: Uuid::new_v4(),
                filename: "big.iso".to_string(),
                content_type: "application/octet-stream".to_string(),
                size_bytes: 100,
                encrypted: false,
                retention_units: None,
            })
            .await
            .unwrap();
        let key = presigned.record.staging_key.clone().unwrap();
        assert!(presigned.upload_url.contains(&key));
        assert_eq!(presigned.expires_in, Duration::from_secs(900));
        assert_eq!(presigned.record.retention_units, 1);
        assert_eq!(presigned.record.content_sha256, None);
        assert!(presigned.record.awaiting_upload());
        let deadline = presigned.record.upload_deadline.unwrap();
        assert_eq!(
            deadline - presigned.record.created_at,
            ChronoDuration::seconds(900)
        );
        assert!(files.get(presigned.record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn confirm_requires_staged_bytes() {
        let staging = Arc::new(MockStorage::with_backend(StorageBackend::S3));
        let (gateway, files) = gateway(staging.clone(), Arc::default());
        let owner = Uuid::new_v4();
        let presigned = gateway
            .ingest_presigned(PresignRequest {
                owner_id: owner,
                filename: "direct.bin".to_string(),
                content_type: "application/octet-stream".to_string(),
                size_bytes: 4,
                encrypted: false,
                retention_units: None,
            })
            .await
            .unwrap();
        let id = presigned.record.id;

        let err = gateway.confirm_upload(owner, id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = gateway.confirm_upload(Uuid::new_v4(), id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let key = presigned.record.staging_key.clone().unwrap();
        staging.set_file(&key, Bytes::from_static(b"data"));
        let confirmed = gateway.confirm_upload(owner, id).await.unwrap();
        assert_eq!(confirmed.upload_deadline, None);
        assert!(!files.get(id).await.unwrap().unwrap().awaiting_upload());

        let err = gateway.confirm_upload(owner, id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn filename_sanitizing() {
        assert_eq!(sanitize_filename("a/b/c.txt").unwrap(), "c.txt");
        assert_eq!(sanitize_filename("my file (1).png").unwrap(), "my_file__1_.png");
        assert_eq!(sanitize_filename("???").unwrap(), "file");
        assert!(sanitize_filename("..").is_err());
    }
}
