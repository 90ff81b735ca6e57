use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Lifecycle of one uploaded payload.
///
/// ```text
/// pending ──▶ processing ──▶ completed
///                 │  ▲
///                 ▼  │
///               failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "file_status", rename_all = "lowercase")
)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    /// The only legal edges of the state machine.
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        matches!(
            (self, next),
            (FileStatus::Pending, FileStatus::Processing)
                | (FileStatus::Failed, FileStatus::Processing)
                | (FileStatus::Processing, FileStatus::Completed)
                | (FileStatus::Processing, FileStatus::Failed)
        )
    }

    /// States from which a committer may claim the record.
    pub fn is_claimable(self) -> bool {
        self.can_transition_to(FileStatus::Processing)
    }

    /// Completed is the only status no transition leaves. Failed records stay
    /// claimable until the dispatcher's attempt limit stops picking them up.
    pub fn is_final(self) -> bool {
        matches!(self, FileStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "processing" => Ok(FileStatus::Processing),
            "completed" => Ok(FileStatus::Completed),
            "failed" => Ok(FileStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid file status: {}", s)),
        }
    }
}

/// One uploaded payload and its progress toward the durable network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct FileRecord {
    pub id: Uuid,
    /// Issued at ingestion and returned to the caller before the commit finishes.
    pub placeholder_id: String,
    /// Durable network identifier. Written once, on the completed transition.
    pub external_id: Option<String>,
    /// Network handle used to extend retention. May stay empty when the commit was
    /// confirmed from an ambiguous write.
    pub committed_object_ref: Option<String>,
    pub staging_key: Option<String>,
    pub owner_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    /// Hex SHA-256 of the payload, when the bytes passed through the gateway.
    pub content_sha256: Option<String>,
    pub encrypted: bool,
    pub retention_units: i32,
    pub status: FileStatus,
    /// Fencing token of the most recent claim.
    pub claim_token: Option<Uuid>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_status_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Set while a presigned upload is outstanding. Dispatch skips the record until
    /// the bytes show up in staging or the upload window closes.
    pub upload_deadline: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Materialize a freshly ingested record.
    pub fn from_new(new: NewFile, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            placeholder_id: new.placeholder_id,
            external_id: None,
            committed_object_ref: None,
            staging_key: Some(new.staging_key),
            owner_id: new.owner_id,
            filename: new.filename,
            content_type: new.content_type,
            size_bytes: new.size_bytes,
            content_sha256: new.content_sha256,
            encrypted: new.encrypted,
            retention_units: new.retention_units,
            status: FileStatus::Pending,
            claim_token: None,
            attempts: 0,
            last_error: None,
            created_at: new.created_at,
            last_status_at: new.created_at,
            committed_at: None,
            expires_at: Some(expires_at),
            upload_deadline: new.upload_deadline,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == FileStatus::Completed && self.external_id.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn awaiting_upload(&self) -> bool {
        self.status == FileStatus::Pending && self.upload_deadline.is_some()
    }
}

/// Everything the gateway knows about a payload before the record exists.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: Uuid,
    pub placeholder_id: String,
    pub staging_key: String,
    pub owner_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub content_sha256: Option<String>,
    pub encrypted: bool,
    pub retention_units: i32,
    pub created_at: DateTime<Utc>,
    /// `Some` for presigned ingestion, where the bytes arrive after the record.
    pub upload_deadline: Option<DateTime<Utc>>,
}

/// Receipt of a confirmed durable write, applied on the completed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub external_id: String,
    pub committed_object_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [FileStatus; 4] = [
        FileStatus::Pending,
        FileStatus::Processing,
        FileStatus::Completed,
        FileStatus::Failed,
    ];

    #[test]
    fn only_documented_transitions_are_legal() {
        let legal = [
            (FileStatus::Pending, FileStatus::Processing),
            (FileStatus::Failed, FileStatus::Processing),
            (FileStatus::Processing, FileStatus::Completed),
            (FileStatus::Processing, FileStatus::Failed),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn only_completed_is_final() {
        for from in ALL {
            let has_exit = ALL.iter().any(|to| from.can_transition_to(*to));
            assert_eq!(from.is_final(), !has_exit, "{}", from);
        }
        assert!(!FileStatus::Failed.is_final());
    }

    #[test]
    fn completed_is_not_claimable() {
        assert!(!FileStatus::Completed.is_claimable());
        assert!(FileStatus::Failed.is_claimable());
        assert!(FileStatus::Pending.is_claimable());
        assert!(!FileStatus::Processing.is_claimable());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in ALL {
            assert_eq!(status.to_string().parse::<FileStatus>().unwrap(), status);
        }
        assert!("running".parse::<FileStatus>().is_err());
    }

    #[test]
    fn new_record_starts_pending_with_staging_key() {
        let now = Utc::now();
        let record = FileRecord::from_new(
            NewFile {
                id: Uuid::new_v4(),
                placeholder_id: "tmp".to_string(),
                staging_key: "staging/a/b".to_string(),
                owner_id: Uuid::new_v4(),
                filename: "a.bin".to_string(),
                content_type: "application/octet-stream".to_string(),
                size_bytes: 3,
                content_sha256: None,
                encrypted: false,
                retention_units: 1,
                created_at: now,
                upload_deadline: None,
            },
            now,
        );
        assert_eq!(record.status, FileStatus::Pending);
        assert_eq!(record.staging_key.as_deref(), Some("staging/a/b"));
        assert!(record.external_id.is_none());
        assert!(record.is_expired(now));
        assert!(!record.is_committed());
        assert!(!record.awaiting_upload());
    }
}
