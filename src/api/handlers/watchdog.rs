//! Watchdog toggle

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::server::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct ToggleRequest {
    pub active: bool,
}

pub async fn toggle(
    State(state): State<AppState>,
    Json(req): Json<ToggleRequest>,
) -> Json<ToggleRequest> {
    state.watchdog.set_enabled(req.active);
    Json(req)
}
