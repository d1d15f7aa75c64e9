mod bootstrap;
mod health;
mod sweeper;

use anyhow::Result;
use countersign_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use countersign_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let sweeper = sweeper::spawn(app.orchestrator.clone(), &app.config.escalation);

    tracing::info!(event_name = "system.server.started", "countersign-server started");
    wait_for_shutdown().await?;
    tracing::info!(event_name = "system.server.stopping", "countersign-server stopping");

    if let Some(handle) = sweeper {
        handle.abort();
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
