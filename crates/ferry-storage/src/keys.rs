//! Shared key generation for staging backends.

use uuid::Uuid;

use crate::traits::{StorageError, StorageResult};

/// Staging key for one file: `staging/{owner_id}/{file_id}`.
pub fn staging_key(owner_id: Uuid, file_id: Uuid) -> String {
    format!("staging/{}/{}", owner_id, file_id)
}

/// Reject keys that could escape the backend's root.
pub(crate) fn validate_key(storage_key: &str) -> StorageResult<()> {
    if storage_key.is_empty() || storage_key.contains("..") || storage_key.starts_with('/') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}
