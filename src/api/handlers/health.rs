//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;
use crate::models::Status;

/// Liveness probe
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "xkeen-panel",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime": state.started_at.elapsed().as_secs(),
        })),
    )
}

/// Current connection status as seen by the watchdog
pub async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(state.watchdog.status())
}
