//! In-memory collaborators for tests
//!
//! Enabled with the `test-helpers` feature so downstream crates can exercise the
//! pipeline without a filesystem, S3 or a live durable network.

pub mod mock_network;
pub mod mock_storage;

pub use mock_network::{MockNetwork, WriteBehavior};
pub use mock_storage::MockStorage;
