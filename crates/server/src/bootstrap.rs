use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use depot_agent::{ActionDispatcher, CapabilityExecutor, ConfirmationHandler};
use depot_core::capability::CapabilityRegistry;
use depot_core::config::{AppConfig, ConfigError, LoadOptions};
use depot_db::actions::{ActionStore, SqlActionStore};
use depot_db::audit::{AuditStore, SqlAuditStore};
use depot_db::sql_store::SqlEntityStore;
use depot_db::store::EntityStore;
use depot_db::{connect, migrations, DbPool};

use crate::agent_api::AgentApiState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub agent_api: AgentApiState,
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
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    // The registry is the only process-wide shared state besides the
    // pool: immutable after this point.
    let registry = Arc::new(CapabilityRegistry::builtin());
    let entity_store: Arc<dyn EntityStore> = Arc::new(SqlEntityStore::new(db_pool.clone()));
    let actions: Arc<dyn ActionStore> = Arc::new(SqlActionStore::new(db_pool.clone()));
    let audit: Arc<dyn AuditStore> = Arc::new(SqlAuditStore::new(db_pool.clone()));
    let executor = Arc::new(CapabilityExecutor::new(audit.clone()));
    let execution_timeout = Duration::from_secs(config.agent.execution_timeout_secs);

    let agent_api = AgentApiState {
        registry: registry.clone(),
        dispatcher: Arc::new(ActionDispatcher::new(
            registry,
            entity_store.clone(),
            actions.clone(),
            executor.clone(),
            execution_timeout,
            config.agent.max_calls_per_dispatch,
        )),
        confirmation: Arc::new(ConfirmationHandler::new(
            entity_store,
            actions.clone(),
            audit,
            executor,
            execution_timeout,
        )),
        actions,
    };

    info!(
        event_name = "system.bootstrap.capabilities_registered",
        correlation_id = "bootstrap",
        capability_count = agent_api.registry.len(),
        "capability registry initialized"
    );

    Ok(Application { config, db_pool, agent_api })
}

#[cfg(test)]
mod tests {
    use depot_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn memory_options() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_prepares_schema_and_registry() {
        let app = bootstrap(memory_options()).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('entity', 'action', 'audit_entry')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected foundation tables to be available after bootstrap");
        assert_eq!(table_count, 3, "bootstrap should expose baseline tables");

        assert_eq!(app.agent_api.registry.len(), 7);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_overrides() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                execution_timeout_secs: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("agent.execution_timeout_secs"));
    }
}
