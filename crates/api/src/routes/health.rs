//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub connections: usize,
}

/// `None` when the service runs without a database
async fn database_healthy(state: &AppState) -> Option<bool> {
    let pool = state.pool.as_ref()?;
    Some(sqlx::query("SELECT 1").execute(pool).await.is_ok())
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (overall_status, db_status) = match database_healthy(&state).await {
        Some(true) => (StatusCode::OK, "healthy"),
        Some(false) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
        None => (StatusCode::OK, "not_configured"),
    };

    (
        overall_status,
        Json(HealthResponse {
            status: if overall_status == StatusCode::OK {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: db_status.to_string(),
            connections: state.hub.presence().connection_count().await,
        }),
    )
}

/// Liveness probe (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe (checks if the service is ready to accept traffic)
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match database_healthy(&state).await {
        Some(false) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}
