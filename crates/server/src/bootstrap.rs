use std::sync::Arc;

use countersign_core::config::{AppConfig, ConfigError, LoadOptions};
use countersign_core::events::NoopHooks;
use countersign_core::orchestrator::Orchestrator;
use countersign_db::{connect, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let store = Arc::new(countersign_db::SqlChainStore::new(db_pool.clone()));
    let definitions = Arc::new(countersign_db::SqlDefinitionSource::new(db_pool.clone()));
    let hooks = Arc::new(NoopHooks);

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        store,
        definitions,
        hooks.clone(),
        hooks,
    ));

    Ok(Application { config, db_pool, orchestrator })
}
