use crate::{
    config::AppConfig,
    error::{Result, ServiceError},
    query::{AskRequest, AskResponse, MatchResult, SqlRequest, SqlResponse},
    state::AppState,
};
use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct Server {
    state: AppState,
}

impl Server {
    /// Wires the service without touching the database; the first
    /// connection is made by [`Server::run`] or by the first query.
    pub fn new(config: AppConfig) -> Result<Self> {
        Ok(Self {
            state: AppState::from_config(config)?,
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(Self::health))
            .route("/translate", post(Self::translate))
            .route("/api/ask", post(Self::ask))
            .route("/api/sql", post(Self::sql))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let guard = Arc::clone(&self.state.guard);
        if let Err(err) = guard.connect().await {
            warn!(error = %err, "database not reachable at startup; will retry on first query");
        }

        let addr = self.state.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "clientql listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        guard.close().await;
        Ok(())
    }

    async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
        let database = state.guard.status();
        Json(json!({ "status": "ok", "database": database }))
    }

    async fn translate(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<AskRequest>,
    ) -> Result<Json<MatchResult>> {
        enforce_api_key(&headers, &state.config)?;
        let response = state.query.translate(request)?;
        Ok(Json(response))
    }

    async fn ask(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<AskRequest>,
    ) -> Result<Json<AskResponse>> {
        enforce_api_key(&headers, &state.config)?;
        let response = state.query.ask(request).await?;
        Ok(Json(response))
    }

    async fn sql(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<SqlRequest>,
    ) -> Result<Json<SqlResponse>> {
        enforce_api_key(&headers, &state.config)?;
        let response = state.query.run_sql(request).await?;
        Ok(Json(response))
    }
}

fn enforce_api_key(headers: &HeaderMap, config: &AppConfig) -> Result<()> {
    if let Some(expected) = &config.api_key {
        let provided = headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());

        if provided != Some(expected.as_str()) {
            return Err(ServiceError::Auth);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
