//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;

use crate::state::AppState;
use anyhow::{Context, Result};
use ferry_core::Config;
use ferry_services::NoopPaymentGate;
use ferry_storage::{create_network, create_storage};
use ferry_worker::TickScheduler;
use std::sync::Arc;
use std::time::Duration;

/// Everything `main` needs to serve and later shut down.
pub struct App {
    pub state: Arc<AppState>,
    pub router: axum::Router,
    pub scheduler: Option<TickScheduler>,
}

/// Connect collaborators, wire the services and build the router.
pub async fn initialize_app(config: Config) -> Result<App> {
    tracing::info!(
        environment = %config.environment(),
        staging_backend = %config.storage_backend(),
        "Configuration loaded and validated"
    );

    let files = database::setup_file_store(&config).await?;
    let staging = create_storage(&config)
        .await
        .context("Failed to initialize staging storage")?;
    let network = create_network(&config).context("Failed to initialize network client")?;

    let state = AppState::build(
        config.clone(),
        files,
        staging,
        network,
        Arc::new(NoopPaymentGate),
    )?;

    let scheduler = match config.dispatch_tick_interval_secs {
        0 => {
            tracing::info!("In-process dispatch disabled; relying on POST /dispatch");
            None
        }
        secs => Some(TickScheduler::start(
            state.dispatcher.clone(),
            Duration::from_secs(secs),
        )),
    };

    let router = routes::setup_routes(&config, state.clone());
    Ok(App {
        state,
        router,
        scheduler,
    })
}
