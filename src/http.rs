//! HTTP surface of the gateway.
//!
//! A small axum application exposing the health probes and the database
//! administration operations. Query execution goes through the uniform
//! facade, so every route behaves identically regardless of the active
//! backend.

use crate::config::Config;
use crate::db::{BackendKind, DatabaseManager, SqlParam};
use crate::error::{DbError, DbResult};
use crate::health::{HealthCheckService, OverallStatus};
use crate::migrate;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub manager: Arc<DatabaseManager>,
    pub health: HealthCheckService,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_basic))
        .route("/health/detailed", get(health_detailed))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/admin/database", get(database_status))
        .route("/admin/database/switch", post(database_switch))
        .route("/admin/database/query", post(database_query))
        .route("/admin/database/migrate", post(database_migrate))
        .route("/admin/database/schema", get(database_schema))
        .with_state(state)
}

/// Bind the listener and serve until a shutdown signal arrives.
pub async fn serve(config: &Config, state: Arc<AppState>) -> DbResult<()> {
    let addr = config.http_bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DbError::config(format!("Failed to bind {addr}: {e}")))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| DbError::internal(format!("HTTP server error: {e}")))?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install shutdown signal handler");
        return;
    }
    info!("Shutdown signal received");
}

async fn health_basic(State(state): State<Arc<AppState>>) -> Response {
    if state.health.basic().await {
        (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable"})),
        )
            .into_response()
    }
}

async fn health_detailed(State(state): State<Arc<AppState>>) -> Response {
    let report = state.health.detailed().await;
    let code = match report.status {
        OverallStatus::Healthy | OverallStatus::Degraded => StatusCode::OK,
        OverallStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(report)).into_response()
}

async fn health_live(State(state): State<Arc<AppState>>) -> Response {
    if state.health.alive() {
        (StatusCode::OK, Json(json!({"status": "alive"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable"})),
        )
            .into_response()
    }
}

async fn health_ready(State(state): State<Arc<AppState>>) -> Response {
    if state.health.ready().await {
        (StatusCode::OK, Json(json!({"status": "ready"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not ready"})),
        )
            .into_response()
    }
}

async fn database_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let backend = state.manager.database_type().await;
    let connected = state.manager.test_connection().await;
    Json(json!({"backend": backend, "connected": connected}))
}

#[derive(Debug, Deserialize)]
struct SwitchRequest {
    backend: BackendKind,
}

async fn database_switch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SwitchRequest>,
) -> Json<serde_json::Value> {
    let switched = state.manager.switch_database(request.backend).await;
    let backend = state.manager.database_type().await;
    let message = if switched {
        format!("Now using {backend}")
    } else {
        format!("Switch to {} failed, running on {backend}", request.backend)
    };
    Json(json!({"switched": switched, "backend": backend, "message": message}))
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    sql: String,
    #[serde(default)]
    params: Vec<SqlParam>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    backend: BackendKind,
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
    rows_affected: u64,
}

async fn database_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let db = state.manager.db().await;
    let output = db.execute(&request.sql, &request.params).await?;
    Ok(Json(QueryResponse {
        backend: db.backend(),
        rows: output.rows,
        rows_affected: output.rows_affected,
    }))
}

async fn database_migrate(
    State(state): State<Arc<AppState>>,
) -> Result<Json<migrate::MigrationSummary>, ApiError> {
    let db = state.manager.db().await;
    let summary = migrate::run_provisioning(&db).await?;
    Ok(Json(summary))
}

async fn database_schema(
    State(state): State<Arc<AppState>>,
) -> Result<Json<migrate::SchemaReport>, ApiError> {
    let db = state.manager.db().await;
    let report = migrate::verify_schema(&db).await?;
    Ok(Json(report))
}

/// Wrapper mapping gateway errors onto HTTP responses.
struct ApiError(DbError);

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            DbError::Database { .. } => StatusCode::BAD_REQUEST,
            DbError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            DbError::Connection { .. } | DbError::DataApi { .. } => StatusCode::BAD_GATEWAY,
            DbError::Config { .. } | DbError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let mut body = json!({"error": self.0.to_string()});
        if let Some(suggestion) = self.0.suggestion() {
            body["suggestion"] = json!(suggestion);
        }
        (code, Json(body)).into_response()
    }
}
