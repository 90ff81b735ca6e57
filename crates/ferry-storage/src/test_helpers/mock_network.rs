//! Scriptable durable network

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::{DurableError, DurableResult, DurableStore, WriteReceipt};

/// What the next `write` call does.
#[derive(Debug, Clone)]
pub enum WriteBehavior {
    Succeed,
    /// Store the content but report no object handle.
    SucceedWithoutObject,
    /// Nothing is stored; the error carries no identifier.
    Fail(String),
    /// The content is stored, then the call errors with the identifier in its text.
    FailAfterStoring,
    /// The call never returns.
    Hang,
}

/// Durable network double. Content ids are derived from the bytes, so identical
/// payloads deduplicate like on the real network.
pub struct MockNetwork {
    blobs: Mutex<HashMap<String, Bytes>>,
    script: Mutex<VecDeque<WriteBehavior>>,
    extensions: Mutex<Vec<(String, i32)>>,
    write_delay: Mutex<Option<Duration>>,
    extend_delay: Mutex<Option<Duration>>,
    fail_extends: AtomicBool,
    unreplicated_reads: AtomicU32,
    fail_reads_permanently: AtomicBool,
    write_calls: AtomicUsize,
    read_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            script: Mutex::new(VecDeque::new()),
            extensions: Mutex::new(Vec::new()),
            write_delay: Mutex::new(None),
            extend_delay: Mutex::new(None),
            fail_extends: AtomicBool::new(false),
            unreplicated_reads: AtomicU32::new(0),
            fail_reads_permanently: AtomicBool::new(false),
            write_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// 43 URL-safe characters, the shape of real content ids.
    pub fn content_id(data: &[u8]) -> String {
        let mut hasher = DefaultHasher::new();
        data.hash(&mut hasher);
        format!("{:0>43}", format!("{:x}", hasher.finish()))
    }

    pub fn object_ref(external_id: &str) -> String {
        format!("0x{}", &external_id[external_id.len().saturating_sub(16)..])
    }

    /// Queue behaviours for the next writes; once drained, writes succeed.
    pub fn script_writes(&self, behaviors: impl IntoIterator<Item = WriteBehavior>) {
        lock(&self.script).extend(behaviors);
    }

    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *lock(&self.write_delay) = delay;
    }

    pub fn set_extend_delay(&self, delay: Option<Duration>) {
        *lock(&self.extend_delay) = delay;
    }

    pub fn fail_extends(&self, fail: bool) {
        self.fail_extends.store(fail, Ordering::SeqCst);
    }

    /// The next `count` reads report `NotYetReplicated`.
    pub fn delay_replication(&self, count: u32) {
        self.unreplicated_reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_reads_permanently(&self, fail: bool) {
        self.fail_reads_permanently.store(fail, Ordering::SeqCst);
    }

    pub fn insert_blob(&self, data: impl Into<Bytes>) -> String {
        let data = data.into();
        let id = Self::content_id(&data);
        lock(&self.blobs).insert(id.clone(), data);
        id
    }

    pub fn has_blob(&self, external_id: &str) -> bool {
        lock(&self.blobs).contains_key(external_id)
    }

    pub fn blob_count(&self) -> usize {
        lock(&self.blobs).len()
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Highest number of writes observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn extensions(&self) -> Vec<(String, i32)> {
        lock(&self.extensions).clone()
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DurableStore for MockNetwork {
    async fn write(&self, data: Bytes, _retention_units: i32) -> DurableResult<WriteReceipt> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let behavior = lock(&self.script)
            .pop_front()
            .unwrap_or(WriteBehavior::Succeed);
        let delay = *lock(&self.write_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let id = Self::content_id(&data);
        match behavior {
            WriteBehavior::Succeed => {
                lock(&self.blobs).insert(id.clone(), data);
                Ok(WriteReceipt {
                    object_ref: Some(Self::object_ref(&id)),
                    external_id: id,
                })
            }
            WriteBehavior::SucceedWithoutObject => {
                lock(&self.blobs).insert(id.clone(), data);
                Ok(WriteReceipt {
                    external_id: id,
                    object_ref: None,
                })
            }
            WriteBehavior::Fail(reason) => Err(DurableError::Transient(reason)),
            WriteBehavior::FailAfterStoring => {
                lock(&self.blobs).insert(id.clone(), data);
                Err(DurableError::Transient(format!(
                    "status 504 Gateway Timeout: timed out waiting for certificate of blob {}",
                    id
                )))
            }
            WriteBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(DurableError::Timeout(Duration::MAX))
            }
        }
    }

    async fn read(&self, external_id: &str) -> DurableResult<Bytes> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads_permanently.load(Ordering::SeqCst) {
            return Err(DurableError::Permanent(format!(
                "blob {} is invalid",
                external_id
            )));
        }
        let pending = self
            .unreplicated_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if pending {
            return Err(DurableError::NotYetReplicated(format!(
                "blob {} not available yet",
                external_id
            )));
        }
        lock(&self.blobs)
            .get(external_id)
            .cloned()
            .ok_or_else(|| {
                DurableError::NotYetReplicated(format!("blob {} not available yet", external_id))
            })
    }

    async fn extend(&self, object_ref: &str, additional_units: i32) -> DurableResult<()> {
        let delay = *lock(&self.extend_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_extends.load(Ordering::SeqCst) {
            return Err(DurableError::Transient(format!(
                "extension of {} refused",
                object_ref
            )));
        }
        lock(&self.extensions).push((object_ref.to_string(), additional_units));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_ids_look_like_real_ones() {
        let id = MockNetwork::content_id(b"hello");
        assert_eq!(id.len(), 43);
        assert_eq!(id, MockNetwork::content_id(b"hello"));
        assert_ne!(id, MockNetwork::content_id(b"world"));
    }

    #[tokio::test]
    async fn scripted_failure_after_storing_keeps_blob() {
        let network = MockNetwork::new();
        network.script_writes([WriteBehavior::FailAfterStoring]);

        let err = network
            .write(Bytes::from_static(b"hello"), 1)
            .await
            .unwrap_err();
        let id = MockNetwork::content_id(b"hello");
        assert!(err.to_string().contains(&id));
        assert!(network.has_blob(&id));

        // Script drained: next write succeeds.
        let receipt = network.write(Bytes::from_static(b"hello"), 1).await.unwrap();
        assert_eq!(receipt.external_id, id);
    }

    #[tokio::test]
    async fn delayed_replication_counts_down() {
        let network = MockNetwork::new();
        let id = network.insert_blob(Bytes::from_static(b"x"));
        network.delay_replication(2);

        assert!(network.read(&id).await.unwrap_err().is_not_yet_replicated());
        assert!(network.read(&id).await.unwrap_err().is_not_yet_replicated());
        assert_eq!(network.read(&id).await.unwrap(), Bytes::from_static(b"x"));
        assert_eq!(network.read_calls(), 3);
    }
}
