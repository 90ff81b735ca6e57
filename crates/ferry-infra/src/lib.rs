//! Ferry Infrastructure Library
//!
//! Shared pieces every Ferry binary needs:
//! - Telemetry initialization
//! - Request ID middleware
//! - The JSON error body returned by the HTTP API

pub mod error;
pub mod middleware;
pub mod telemetry;

pub use error::ErrorResponse;
pub use middleware::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
pub use telemetry::{init_telemetry, LogFormat};
