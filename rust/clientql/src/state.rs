use crate::{
    config::AppConfig,
    db::{PgConnector, PgGuard},
    error::{Result, ServiceError},
    executor::QueryExecutor,
    query::QueryEngine,
};
use std::sync::Arc;

/// Shared handler state. The guard is the single owner of the database
/// pool; the engine reaches it through its executor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub guard: Arc<PgGuard>,
    pub query: QueryEngine,
}

impl AppState {
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let connector =
            PgConnector::new(&config).map_err(|err| ServiceError::Config(format!("{err:#}")))?;
        let guard = Arc::new(PgGuard::new(connector));
        let executor = QueryExecutor::new(Arc::clone(&guard), &config);

        Ok(Self {
            config: Arc::new(config),
            guard,
            query: QueryEngine::new(executor),
        })
    }
}
