use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::file::{FileRecord, FileStatus};

/// Immediate answer to an upload; the commit continues in the background.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestResponse {
    pub id: Uuid,
    pub placeholder_id: String,
    pub status: FileStatus,
}

/// Request a URL for uploading bytes straight into staging
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PresignedUploadRequest {
    /// Original filename
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    pub filename: String,
    /// Content type (MIME type)
    #[validate(length(
        min = 1,
        max = 255,
        message = "Content type must be between 1 and 255 characters"
    ))]
    pub content_type: String,
    /// Declared file size in bytes
    #[validate(range(min = 1, message = "File size must be at least 1 byte"))]
    pub file_size: u64,
    #[serde(default)]
    pub encrypted: bool,
    /// Retention epochs; the deployment default when omitted
    #[serde(default)]
    pub retention_units: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PresignedUploadResponse {
    pub id: Uuid,
    pub placeholder_id: String,
    pub upload_url: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ExtendRetentionRequest {
    #[validate(range(min = 1, message = "Additional units must be at least 1"))]
    pub additional_units: i32,
}

/// Caller-visible view of a file record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileResponse {
    pub id: Uuid,
    pub placeholder_id: String,
    pub external_id: Option<String>,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub encrypted: bool,
    pub retention_units: i32,
    pub status: FileStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Set while a presigned upload has not been seen in staging.
    pub upload_deadline: Option<DateTime<Utc>>,
}

impl From<FileRecord> for FileResponse {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.id,
            placeholder_id: record.placeholder_id,
            external_id: record.external_id,
            filename: record.filename,
            content_type: record.content_type,
            size_bytes: record.size_bytes,
            encrypted: record.encrypted,
            retention_units: record.retention_units,
            status: record.status,
            attempts: record.attempts,
            last_error: record.last_error,
            created_at: record.created_at,
            expires_at: record.expires_at,
            upload_deadline: record.upload_deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presigned_request_rejects_zero_size() {
        let req = PresignedUploadRequest {
            filename: "a.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            file_size: 0,
            encrypted: false,
            retention_units: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn extend_request_requires_positive_units() {
        assert!(ExtendRetentionRequest { additional_units: 0 }
            .validate()
            .is_err());
        assert!(ExtendRetentionRequest { additional_units: 2 }
            .validate()
            .is_ok());
    }
}
