use ferry_api::setup;
use ferry_core::Config;
use ferry_infra::{init_telemetry, LogFormat};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let log_format = config.base.log_format.parse::<LogFormat>().unwrap_or_default();
    init_telemetry(log_format).map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let app = setup::initialize_app(config.clone()).await?;
    setup::server::start_server(&config, app.router).await?;

    if let Some(scheduler) = app.scheduler {
        scheduler.shutdown().await;
    }
    Ok(())
}
