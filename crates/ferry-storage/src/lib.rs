//! Ferry Storage Library
//!
//! Two very different byte stores live here:
//!
//! - the **staging store** ([`Storage`]): fast, non-replicated, holds uploads until they
//!   are committed. Backends are the local filesystem and S3-compatible object storage.
//! - the **durable network** ([`DurableStore`]): slow, replicated and eventually
//!   consistent. It is the system of record once a file is committed.
//!
//! # Staging key format
//!
//! Keys are owner-scoped: `staging/{owner_id}/{file_id}`. Keys must not contain `..`
//! or a leading `/`. Key generation is centralized in the `keys` module.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod network;
#[cfg(feature = "storage-s3")]
pub mod s3;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
pub mod traits;

// Re-export commonly used types
pub use factory::{create_network, create_storage};
pub use ferry_core::StorageBackend;
pub use keys::staging_key;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use network::{DurableError, DurableResult, DurableStore, HttpNetworkClient, WriteReceipt};
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};
