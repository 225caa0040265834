use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: String,
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

/// Liveness: always healthy while the process serves requests.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        message: "Server is running".into(),
    })
}

/// Readiness: also requires the database to answer.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.users.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ready",
                message: "Database is reachable".into(),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    message: "Database is unreachable".into(),
                }),
            )
        }
    }
}
