//! Mock staging store that keeps objects in memory

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::{Storage, StorageBackend, StorageError, StorageResult};

pub struct MockStorage {
    files: Mutex<HashMap<String, Bytes>>,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
    get_delay: Mutex<Option<Duration>>,
    backend_type: StorageBackend,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::with_backend(StorageBackend::Local)
    }

    /// An S3 flavour also hands out presigned URLs.
    pub fn with_backend(backend_type: StorageBackend) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            fail_puts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            get_delay: Mutex::new(None),
            backend_type,
        }
    }

    fn files(&self) -> MutexGuard<'_, HashMap<String, Bytes>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_file(&self, key: &str, data: impl Into<Bytes>) {
        self.files().insert(key.to_string(), data.into());
    }

    pub fn remove_file(&self, key: &str) {
        self.files().remove(key);
    }

    pub fn has_file(&self, key: &str) -> bool {
        self.files().contains_key(key)
    }

    pub fn get_file(&self, key: &str) -> Option<Bytes> {
        self.files().get(key).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files().len()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Delay every `get` by `delay`.
    pub fn set_get_delay(&self, delay: Option<Duration>) {
        *self.get_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn put(&self, storage_key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed("mock put failure".to_string()));
        }
        self.files().insert(storage_key.to_string(), data);
        Ok(())
    }

    async fn get(&self, storage_key: &str) -> StorageResult<Bytes> {
        let delay = *self.get_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.files()
            .get(storage_key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed("mock delete failure".to_string()));
        }
        self.files().remove(storage_key);
        Ok(())
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        Ok(self.has_file(storage_key))
    }

    async fn presigned_put_url(
        &self,
        storage_key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        match self.backend_type {
            StorageBackend::S3 => Ok(format!(
                "https://staging.example.com/{}?X-Amz-Expires={}",
                storage_key,
                expires_in.as_secs()
            )),
            StorageBackend::Local => Err(StorageError::ConfigError(
                "Presigned uploads are only supported by the S3 staging backend".to_string(),
            )),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        self.backend_type
    }
}
