//! Durable storage network abstraction
//!
//! The network is slow and eventually consistent. A write may time out yet have
//! succeeded, and freshly written content may not be readable for a while. Callers
//! classify failures through [`DurableError`].

mod client;

use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::AppError;
use std::time::Duration;
use thiserror::Error;

pub use self::client::HttpNetworkClient;

/// Identifiers returned by a confirmed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Content identifier used for reads.
    pub external_id: String,
    /// On-chain object handle, needed to extend retention. Not every write path
    /// reports one.
    pub object_ref: Option<String>,
}

#[derive(Debug, Error)]
pub enum DurableError {
    /// The content exists but storage nodes have not yet served it.
    #[error("Not yet replicated: {0}")]
    NotYetReplicated(String),

    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("Permanent network error: {0}")]
    Permanent(String),

    #[error("Network operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for durable network operations
pub type DurableResult<T> = Result<T, DurableError>;

impl DurableError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DurableError::Permanent(_))
    }

    pub fn is_not_yet_replicated(&self) -> bool {
        matches!(self, DurableError::NotYetReplicated(_))
    }
}

impl From<DurableError> for AppError {
    fn from(err: DurableError) -> Self {
        match err {
            DurableError::NotYetReplicated(msg) => AppError::ReplicationDelay(msg),
            other => AppError::Network(other.to_string()),
        }
    }
}

/// Durable storage network client
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Store `data` for `retention_units` epochs.
    ///
    /// An `Err` does not prove the write failed: the error text may carry the
    /// identifier of content that was in fact stored.
    async fn write(&self, data: Bytes, retention_units: i32) -> DurableResult<WriteReceipt>;

    /// Read content by its external identifier.
    async fn read(&self, external_id: &str) -> DurableResult<Bytes>;

    /// Extend the retention of a stored object by `additional_units` epochs.
    async fn extend(&self, object_ref: &str, additional_units: i32) -> DurableResult<()>;
}
