use axum::{Json, extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::AppState;
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub worker_address: String,
    pub started_at: DateTime<Utc>,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Relay health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    // The upload channel closes only when the relay loop has stopped
    let status = if state.uploads.is_closed() {
        "relay_stopped"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        sessions: state.sessions.len().await,
        worker_address: state.config.worker_address(),
        started_at: state.started_at,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
