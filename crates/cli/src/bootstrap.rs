use std::sync::Arc;

use portal_core::config::{AppConfig, ConfigError, LoadOptions};
use portal_core::vacation::KeywordFormFieldExtractor;
use portal_core::{TracingAuditSink, WorkflowEngine, WorkflowPorts, WorkflowSettings};
use portal_db::{
    connect_with_settings, migrations, DbPool, SqlDirectory, SqlRequestRepository,
    SqlTemplateRepository, SqlVacationScheduler,
};
use thiserror::Error;
use tracing::info;

use crate::notifier::TracingNotifier;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: WorkflowEngine,
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
    pub fn class(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_validation",
            Self::DatabaseConnect(_) => "db_connectivity",
            Self::Migration(_) => "migration",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::DatabaseConnect(_) => 4,
            Self::Migration(_) => 5,
        }
    }
}

pub async fn connect_and_migrate(config: &AppConfig) -> Result<DbPool, BootstrapError> {
    // Every in-memory connection is its own database.
    let max_connections =
        if config.database.url.contains(":memory:") { 1 } else { config.database.max_connections };
    let db_pool =
        connect_with_settings(&config.database.url, max_connections, config.database.timeout_secs)
            .await
            .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    Ok(db_pool)
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    let db_pool = connect_and_migrate(&config).await?;
    let engine = build_engine(db_pool.clone(), &config);

    Ok(Application { config, db_pool, engine })
}

/// Wires the SQLite adapters into a workflow engine.
pub fn build_engine(db_pool: DbPool, config: &AppConfig) -> WorkflowEngine {
    let directory = Arc::new(SqlDirectory::new(db_pool.clone()));
    let forms = Arc::new(KeywordFormFieldExtractor);
    let ports = WorkflowPorts {
        requests: Arc::new(SqlRequestRepository::new(db_pool.clone())),
        templates: Arc::new(SqlTemplateRepository::new(db_pool.clone())),
        users: directory.clone(),
        groups: directory.clone(),
        substitutes: directory.clone(),
        delegations: directory,
        notifier: Arc::new(TracingNotifier),
        scheduler: Arc::new(SqlVacationScheduler::new(db_pool, forms.clone())),
        audit: Arc::new(TracingAuditSink),
        forms,
    };
    WorkflowEngine::new(ports, WorkflowSettings::from(&config.workflow))
}
