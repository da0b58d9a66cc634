//! xkeen daemon control

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::api::server::AppState;
use crate::error::Result;
use crate::xray::{current_outbound as read_outbound, OutboundTarget, RestartOutcome};

pub async fn restart(State(state): State<AppState>) -> Result<Json<Value>> {
    info!(
        "Restart requested via API ({})",
        state.controller.daemon_path().display()
    );

    let message = match state.controller.restart()? {
        RestartOutcome::Initiated => "restarting",
        RestartOutcome::AlreadyInProgress => "restart already in progress",
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "restarting": true,
    })))
}

/// Run `xkeen -u`; failures carry the command output in the error body
pub async fn update(State(state): State<AppState>) -> Result<Json<Value>> {
    let output = state.controller.update().await?;

    Ok(Json(json!({
        "success": true,
        "output": output,
    })))
}

/// Where the proxy outbound currently points
pub async fn current_outbound(State(state): State<AppState>) -> Result<Json<OutboundTarget>> {
    Ok(Json(read_outbound(&state.config.xkeen.outbounds_file)?))
}
