use std::future::Future;
use std::sync::Arc;

use routedesk_core::audit::TracingAuditSink;
use routedesk_core::config::{AppConfig, ConfigError, LoadOptions};
use routedesk_core::{KeywordClassifier, Pipeline};
use routedesk_db::{connect_from_config, migrations, DbPool, SqlTaskRepository, SqlTeamDirectory};
use thiserror::Error;
use tracing::info;

use crate::commands::CommandResult;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub pipeline: Pipeline,
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

impl BootstrapError {
    pub fn into_result(self, command: &str) -> CommandResult {
        match self {
            Self::Config(error) => CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            ),
            Self::DatabaseConnect(error) => {
                CommandResult::failure(command, "db_connectivity", error.to_string(), 4)
            }
            Self::Migration(error) => {
                CommandResult::failure(command, "migration", error.to_string(), 5)
            }
        }
    }
}

/// Connects, migrates and wires the pipeline over the SQLite stores with the
/// keyword classifier.
pub async fn bootstrap(config: AppConfig) -> Result<Application, BootstrapError> {
    let db_pool = connect_from_config(&config.database)
        .await
        .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let pipeline = Pipeline::new(
        &config.pipeline,
        Arc::new(KeywordClassifier::default()),
        Arc::new(SqlTeamDirectory::new(db_pool.clone())),
        Arc::new(SqlTaskRepository::new(db_pool.clone())),
    )
    .with_audit_sink(Arc::new(TracingAuditSink));

    Ok(Application { config, db_pool, pipeline })
}

/// Loads configuration and runs `body` on a fresh current-thread runtime.
/// Config and runtime failures are reported with the shared exit codes.
pub fn run_with_config<F, Fut>(command: &str, options: &LoadOptions, body: F) -> CommandResult
where
    F: FnOnce(AppConfig) -> Fut,
    Fut: Future<Output = CommandResult>,
{
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return BootstrapError::Config(error).into_result(command),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    runtime.block_on(body(config))
}

/// Like [`run_with_config`], with a bootstrapped application. The pool is
/// closed after `body` finishes.
pub fn run_with_app<F, Fut>(command: &str, options: &LoadOptions, body: F) -> CommandResult
where
    F: FnOnce(Arc<Application>) -> Fut,
    Fut: Future<Output = CommandResult>,
{
    run_with_config(command, options, |config| async move {
        let app = match bootstrap(config).await {
            Ok(app) => Arc::new(app),
            Err(error) => return error.into_result(command),
        };
        let pool = app.db_pool.clone();
        let result = body(app).await;
        pool.close().await;
        result
    })
}
