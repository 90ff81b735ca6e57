//! Ferry Services
//!
//! Caller-facing operations of the pipeline: ingestion, retrieval, lazy expiry and
//! retention extension. Background commit work lives in `ferry-worker`.

pub mod gateway;
pub mod payment;
pub mod retention;
pub mod retrieval;
pub mod sweeper;

pub use gateway::{sanitize_filename, IngestRequest, IngestionGateway, PresignRequest, PresignedIngest};
pub use payment::{NoopPaymentGate, PaymentGate, Reservation};
pub use retention::RetentionService;
pub use retrieval::{ContentSource, RetrievalService, RetrievedFile};
pub use sweeper::ExpirationSweeper;
