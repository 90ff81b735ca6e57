//! Ferry Core Library
//!
//! This crate provides the domain models, the file state machine, error types,
//! pipeline policies and configuration shared across all Ferry components.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod policy;
pub mod storage_types;

// Re-export commonly used types
pub use config::{BaseConfig, Config, NetworkConfig, StorageConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{FileRecord, FileStatus, NewFile, Share};
pub use policy::{CommitPolicy, DispatchPolicy, RetentionPolicy, RetrievalPolicy};
pub use storage_types::StorageBackend;
