use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Public link to a file. Issued and revoked elsewhere; deleted together with its file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct Share {
    pub id: Uuid,
    pub file_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub download_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Share {
    pub fn new(file_id: Uuid, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_id,
            expires_at,
            revoked: false,
            download_count: 0,
            created_at: Utc::now(),
        }
    }
}
