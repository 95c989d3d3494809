//! # Sync Engine Main Entry Point

use anyhow::Context;
use migration::{Migrator, MigratorTrait};
use sync_engine::{config::ConfigLoader, db, server::run_server, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;

    telemetry::init_tracing(&config).context("Failed to initialize tracing")?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        info!(config = %redacted_json, "Effective configuration");
    }

    let connection = db::init_pool(&config).await?;
    Migrator::up(&connection, None)
        .await
        .context("Failed to apply database migrations")?;

    run_server(config, connection).await
}
