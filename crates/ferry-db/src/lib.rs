//! File table repositories
//!
//! [`FileStore`] is the single coordination point of the pipeline. The Postgres
//! implementation backs production; [`InMemoryFileStore`] applies the same guards
//! under a mutex and backs unit tests and local runs without a database.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::InMemoryFileStore;
pub use postgres::FileRepository;
pub use store::{CandidateQuery, ClaimLimits, ClaimOutcome, FileStore, InFlightCounts};
