//! HTTP error body
//!
//! The `IntoResponse` conversion for `AppError` lives in the API binary; orphan rules
//! keep it out of this crate.

use serde::Serialize;
use utoipa::ToSchema;

/// Error body returned by every failing API call.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable code, e.g. `REPLICATION_DELAY`.
    pub code: String,
    /// Whether retrying the same request may succeed.
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}
