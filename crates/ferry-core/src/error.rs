//! Error types module
//!
//! All caller-facing failures are unified under [`AppError`]. Each variant
//! self-describes its HTTP presentation through [`ErrorMetadata`], including
//! whether the caller may retry.
//!
//! The `Database` variant carries a `sqlx::Error` when the `sqlx` feature is enabled
//! and a plain message otherwise.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like network delays
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "REPLICATION_DELAY")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment required: {0}")]
    PaymentRequired(String),

    /// The staging store rejected or lost a write or read.
    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// The durable write errored but may have succeeded.
    #[error("Commit outcome ambiguous: {0}")]
    CommitAmbiguous(String),

    /// Committed content is not yet readable from the durable network.
    #[error("Still replicating: {0}")]
    ReplicationDelay(String),

    /// Neither a staged copy nor a committed identifier exists yet.
    #[error("Not committed yet: {0}")]
    NotCommitted(String),

    /// A committer lost its claim fence. Internal only.
    #[error("Stale claim: {0}")]
    StaleClaim(String),

    #[error("Durable network error: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the file ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::PayloadTooLarge(_) => (
            413,
            "PAYLOAD_TOO_LARGE",
            false,
            Some("Reduce file size"),
            false,
            LogLevel::Debug,
        ),
        AppError::Unauthorized(_) => (
            401,
            "UNAUTHORIZED",
            false,
            Some("Check owner credentials"),
            false,
            LogLevel::Debug,
        ),
        AppError::Conflict(_) => (
            409,
            "CONFLICT",
            false,
            Some("Check the file status and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::PaymentRequired(_) => (
            402,
            "PAYMENT_REQUIRED",
            false,
            Some("Top up the account balance"),
            false,
            LogLevel::Debug,
        ),
        AppError::Staging(_) => (
            503,
            "STAGING_ERROR",
            true,
            Some("Retry the upload after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::CommitFailed(_) => (
            502,
            "COMMIT_FAILED",
            true,
            Some("The commit will be retried automatically"),
            true,
            LogLevel::Warn,
        ),
        AppError::CommitAmbiguous(_) => (
            502,
            "COMMIT_AMBIGUOUS",
            true,
            Some("The commit will be verified automatically"),
            true,
            LogLevel::Warn,
        ),
        AppError::ReplicationDelay(_) => (
            503,
            "REPLICATION_DELAY",
            true,
            Some("The file is still replicating; retry in a few seconds"),
            false,
            LogLevel::Warn,
        ),
        AppError::NotCommitted(_) => (
            409,
            "NOT_COMMITTED",
            true,
            Some("Retry after the file has been committed"),
            false,
            LogLevel::Debug,
        ),
        AppError::StaleClaim(_) => (
            409,
            "STALE_CLAIM",
            true,
            None,
            true,
            LogLevel::Warn,
        ),
        AppError::Network(_) => (
            502,
            "NETWORK_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Conflict(_) => "Conflict",
            AppError::PaymentRequired(_) => "PaymentRequired",
            AppError::Staging(_) => "Staging",
            AppError::CommitFailed(_) => "CommitFailed",
            AppError::CommitAmbiguous(_) => "CommitAmbiguous",
            AppError::ReplicationDelay(_) => "ReplicationDelay",
            AppError::NotCommitted(_) => "NotCommitted",
            AppError::StaleClaim(_) => "StaleClaim",
            AppError::Network(_) => "Network",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::PayloadTooLarge(ref msg) => msg.clone(),
            AppError::Unauthorized(ref msg) => msg.clone(),
            AppError::Conflict(ref msg) => msg.clone(),
            AppError::PaymentRequired(ref msg) => msg.clone(),
            AppError::Staging(_) => "Failed to stage file content".to_string(),
            AppError::CommitFailed(_) => "Failed to commit file".to_string(),
            AppError::CommitAmbiguous(_) => "File commit is being verified".to_string(),
            AppError::ReplicationDelay(_) => {
                "File is still replicating, retry later".to_string()
            }
            AppError::NotCommitted(ref msg) => msg.clone(),
            AppError::StaleClaim(_) => "Internal server error".to_string(),
            AppError::Network(_) => "Durable storage network unavailable".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }
}
