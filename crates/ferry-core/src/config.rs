//! Configuration module
//!
//! Settings are read from the environment (optionally seeded from a `.env` file)
//! and grouped into the policies consumed by the pipeline components.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::policy::{CommitPolicy, DispatchPolicy, RetentionPolicy, RetrievalPolicy};
use crate::storage_types::StorageBackend;

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const SERVER_PORT: u16 = 4000;
const NETWORK_REQUEST_TIMEOUT_SECS: u64 = 30;
const LOCAL_STORAGE_PATH: &str = "./data/staging";
const LOCAL_STORAGE_BASE_URL: &str = "http://localhost:4000/staging";
const PUBLISHER_URL: &str = "http://127.0.0.1:31415";
const AGGREGATOR_URL: &str = "http://127.0.0.1:31416";

/// Parse an environment variable, falling back to `default` when unset or malformed.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Process-level settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    /// `json` switches the log formatter to JSON lines.
    pub log_format: String,
}

/// Staging store settings
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, etc.)
    pub aws_region: Option<String>,
    pub local_storage_path: String,
    pub local_storage_base_url: String,
    pub presigned_upload_ttl_secs: u64,
}

/// Durable storage network endpoints
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub publisher_url: String,
    pub aggregator_url: String,
    pub request_timeout_secs: u64,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub base: BaseConfig,
    /// In-memory metadata is used when unset (development only).
    pub database_url: Option<String>,
    pub storage: StorageConfig,
    pub network: NetworkConfig,
    pub max_file_size_bytes: usize,
    pub retention: RetentionPolicy,
    pub dispatch: DispatchPolicy,
    pub commit: CommitPolicy,
    pub retrieval: RetrievalPolicy,
    pub stale_threshold_secs: u64,
    pub staging_grace_secs: u64,
    pub staging_janitor_batch: i64,
    /// Interval of the in-process dispatcher tick. 0 = rely on the external trigger only.
    pub dispatch_tick_interval_secs: u64,
    pub dispatch_on_ingest: bool,
    /// Shared secret for `POST /dispatch`. Open when unset.
    pub dispatch_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base: BaseConfig {
                server_port: SERVER_PORT,
                environment: "development".to_string(),
                db_max_connections: MAX_CONNECTIONS,
                db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
                log_format: "pretty".to_string(),
            },
            database_url: None,
            storage: StorageConfig {
                backend: StorageBackend::Local,
                s3_bucket: None,
                s3_region: None,
                s3_endpoint: None,
                aws_region: None,
                local_storage_path: LOCAL_STORAGE_PATH.to_string(),
                local_storage_base_url: LOCAL_STORAGE_BASE_URL.to_string(),
                presigned_upload_ttl_secs: PRESIGNED_UPLOAD_TTL_SECS,
            },
            network: NetworkConfig {
                publisher_url: PUBLISHER_URL.to_string(),
                aggregator_url: AGGREGATOR_URL.to_string(),
                request_timeout_secs: NETWORK_REQUEST_TIMEOUT_SECS,
            },
            max_file_size_bytes: MAX_FILE_SIZE_MB * 1024 * 1024,
            retention: RetentionPolicy::default(),
            dispatch: DispatchPolicy::default(),
            commit: CommitPolicy::default(),
            retrieval: RetrievalPolicy::default(),
            stale_threshold_secs: STALE_THRESHOLD_SECS,
            staging_grace_secs: STAGING_GRACE_SECS,
            staging_janitor_batch: STAGING_JANITOR_BATCH,
            dispatch_tick_interval_secs: DISPATCH_TICK_INTERVAL_SECS,
            dispatch_on_ingest: false,
            dispatch_token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_parse("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
        };

        let backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => StorageBackend::Local,
        };

        let storage = StorageConfig {
            backend,
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            aws_region: env::var("AWS_REGION").ok(),
            local_storage_path: env::var("LOCAL_STORAGE_PATH")
                .unwrap_or_else(|_| LOCAL_STORAGE_PATH.to_string()),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL")
                .unwrap_or_else(|_| LOCAL_STORAGE_BASE_URL.to_string()),
            presigned_upload_ttl_secs: env_parse(
                "PRESIGNED_UPLOAD_TTL_SECS",
                PRESIGNED_UPLOAD_TTL_SECS,
            ),
        };

        let network = NetworkConfig {
            publisher_url: env::var("NETWORK_PUBLISHER_URL")
                .unwrap_or_else(|_| PUBLISHER_URL.to_string()),
            aggregator_url: env::var("NETWORK_AGGREGATOR_URL")
                .unwrap_or_else(|_| AGGREGATOR_URL.to_string()),
            request_timeout_secs: env_parse(
                "NETWORK_REQUEST_TIMEOUT_SECS",
                NETWORK_REQUEST_TIMEOUT_SECS,
            ),
        };

        let retention = RetentionPolicy {
            epoch_duration_ms: env_parse("EPOCH_DURATION_MS", EPOCH_DURATION_MS),
            max_units: env_parse("MAX_RETENTION_UNITS", MAX_RETENTION_UNITS),
            default_units: env_parse("DEFAULT_RETENTION_UNITS", DEFAULT_RETENTION_UNITS),
        };

        let dispatch = DispatchPolicy {
            max_global: env_parse("DISPATCH_MAX_GLOBAL", DISPATCH_MAX_GLOBAL),
            max_per_owner: env_parse("DISPATCH_MAX_PER_OWNER", DISPATCH_MAX_PER_OWNER),
            small_file_threshold_bytes: env_parse(
                "DISPATCH_SMALL_FILE_THRESHOLD_MB",
                DISPATCH_SMALL_FILE_THRESHOLD_MB,
            ) * 1024
                * 1024,
            scan_limit: env_parse("DISPATCH_SCAN_LIMIT", DISPATCH_SCAN_LIMIT),
            max_attempts: env_parse("MAX_COMMIT_ATTEMPTS", MAX_COMMIT_ATTEMPTS),
        };

        let commit = CommitPolicy {
            staging_read_timeout: Duration::from_secs(env_parse(
                "COMMIT_STAGING_READ_TIMEOUT_SECS",
                COMMIT_STAGING_READ_TIMEOUT_SECS,
            )),
            write_base_timeout: Duration::from_secs(env_parse(
                "COMMIT_WRITE_BASE_TIMEOUT_SECS",
                COMMIT_WRITE_BASE_TIMEOUT_SECS,
            )),
            write_per_unit_timeout: Duration::from_secs(env_parse(
                "COMMIT_WRITE_PER_UNIT_TIMEOUT_SECS",
                COMMIT_WRITE_PER_UNIT_TIMEOUT_SECS,
            )),
            write_baseline_units: env_parse(
                "COMMIT_WRITE_BASELINE_UNITS",
                COMMIT_WRITE_BASELINE_UNITS,
            ),
            write_max_timeout: Duration::from_secs(env_parse(
                "COMMIT_WRITE_MAX_TIMEOUT_SECS",
                COMMIT_WRITE_MAX_TIMEOUT_SECS,
            )),
            verify_ambiguous: env_flag("COMMIT_VERIFY_AMBIGUOUS", true),
            verify_timeout: Duration::from_secs(env_parse(
                "COMMIT_VERIFY_TIMEOUT_SECS",
                COMMIT_VERIFY_TIMEOUT_SECS,
            )),
        };

        let retrieval = RetrievalPolicy {
            max_attempts: env_parse("RETRIEVAL_MAX_ATTEMPTS", RETRIEVAL_MAX_ATTEMPTS),
            base_delay: Duration::from_millis(env_parse(
                "RETRIEVAL_BASE_DELAY_MS",
                RETRIEVAL_BASE_DELAY_MS,
            )),
            max_delay: Duration::from_millis(env_parse(
                "RETRIEVAL_MAX_DELAY_MS",
                RETRIEVAL_MAX_DELAY_MS,
            )),
            ..RetrievalPolicy::default()
        };

        let max_file_size_mb: usize = env_parse("MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB);

        let config = Config {
            base,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            storage,
            network,
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            retention,
            dispatch,
            commit,
            retrieval,
            stale_threshold_secs: env_parse("STALE_THRESHOLD_SECS", STALE_THRESHOLD_SECS),
            staging_grace_secs: env_parse("STAGING_GRACE_SECS", STAGING_GRACE_SECS),
            staging_janitor_batch: env_parse("STAGING_JANITOR_BATCH", STAGING_JANITOR_BATCH),
            dispatch_tick_interval_secs: env_parse(
                "DISPATCH_TICK_INTERVAL_SECS",
                DISPATCH_TICK_INTERVAL_SECS,
            ),
            dispatch_on_ingest: env_flag("DISPATCH_ON_INGEST", false),
            dispatch_token: env::var("DISPATCH_TOKEN").ok().filter(|s| !s.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.is_production() && self.database_url.is_none() {
            return Err(anyhow::anyhow!("DATABASE_URL must be set in production"));
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        match self.storage.backend {
            StorageBackend::S3 => {
                if self.storage.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.storage.local_storage_path.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must not be empty when using local storage backend"
                    ));
                }
            }
        }

        for (name, url) in [
            ("NETWORK_PUBLISHER_URL", &self.network.publisher_url),
            ("NETWORK_AGGREGATOR_URL", &self.network.aggregator_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!("{} must be an http(s) URL", name));
            }
        }

        if self.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_FILE_SIZE_MB must be at least 1"));
        }

        if self.retention.epoch_duration_ms <= 0 || self.retention.max_units < 1 {
            return Err(anyhow::anyhow!(
                "EPOCH_DURATION_MS and MAX_RETENTION_UNITS must be positive"
            ));
        }

        if !self.retention.is_valid_request(self.retention.default_units) {
            return Err(anyhow::anyhow!(
                "DEFAULT_RETENTION_UNITS must be between 1 and MAX_RETENTION_UNITS ({})",
                self.retention.max_units
            ));
        }

        if self.dispatch.max_global == 0 || self.dispatch.max_per_owner == 0 {
            return Err(anyhow::anyhow!(
                "DISPATCH_MAX_GLOBAL and DISPATCH_MAX_PER_OWNER must be at least 1"
            ));
        }

        if self.dispatch.scan_limit < 1 {
            return Err(anyhow::anyhow!("DISPATCH_SCAN_LIMIT must be at least 1"));
        }

        // A live committer must never be reaped.
        if self.stale_threshold() <= self.commit.max_duration() {
            return Err(anyhow::anyhow!(
                "STALE_THRESHOLD_SECS ({}s) must exceed the maximum commit duration ({}s)",
                self.stale_threshold_secs,
                self.commit.max_duration().as_secs()
            ));
        }

        if self.retrieval.max_attempts == 0 {
            return Err(anyhow::anyhow!("RETRIEVAL_MAX_ATTEMPTS must be at least 1"));
        }

        Ok(())
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn server_port(&self) -> u16 {
        self.base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.base.environment
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    pub fn db_max_connections(&self) -> u32 {
        self.base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.base.db_timeout_seconds
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.storage.backend
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.storage.s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.storage.s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.storage.s3_endpoint.as_deref()
    }

    pub fn aws_region(&self) -> Option<&str> {
        self.storage.aws_region.as_deref()
    }

    pub fn local_storage_path(&self) -> &str {
        &self.storage.local_storage_path
    }

    pub fn local_storage_base_url(&self) -> &str {
        &self.storage.local_storage_base_url
    }

    pub fn presigned_upload_ttl(&self) -> Duration {
        Duration::from_secs(self.storage.presigned_upload_ttl_secs)
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_bytes
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn staging_grace(&self) -> Duration {
        Duration::from_secs(self.staging_grace_secs)
    }
}
