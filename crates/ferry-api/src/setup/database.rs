//! Metadata store setup

use anyhow::{Context, Result};
use ferry_core::Config;
use ferry_db::{FileRepository, FileStore, InMemoryFileStore};
use sqlx::postgres::PgPoolOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Connect to Postgres and apply migrations, or fall back to the in-memory store
/// when no database is configured outside production.
pub async fn setup_file_store(config: &Config) -> Result<Arc<dyn FileStore>> {
    let Some(url) = config.database_url() else {
        tracing::warn!("DATABASE_URL not set, using in-memory metadata (state is lost on restart)");
        return Ok(Arc::new(InMemoryFileStore::new()));
    };

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections())
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds()))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections(),
        "Database connected successfully"
    );

    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(Arc::new(FileRepository::new(pool)))
}
