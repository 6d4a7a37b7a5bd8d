use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::controller::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    /// Whether the simulation has completed at least one tick
    simulation_running: bool,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let simulation_running = state.status.read().is_some();
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            timestamp: chrono::Utc::now(),
            simulation_running,
        }),
    )
}
