//! Endpoint list, selection and latency checks

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::server::AppState;
use crate::error::{PanelError, Result};
use crate::models::{Endpoint, SelectServerRequest};
use crate::xray::{check_all, write_outbound, PROBE_TIMEOUT};

#[derive(Debug, Serialize)]
pub struct ServersResponse {
    pub servers: Vec<Endpoint>,
}

pub async fn list_servers(State(state): State<AppState>) -> Json<ServersResponse> {
    Json(ServersResponse {
        servers: state.store.all_endpoints(),
    })
}

/// Make an endpoint active, point the outbound at it and restart in the background
pub async fn select_server(
    State(state): State<AppState>,
    Json(req): Json<SelectServerRequest>,
) -> Result<Json<Value>> {
    info!("Selecting endpoint {}", req.id);

    // Refuse what cannot be written before the active pointer moves
    let candidate = state
        .store
        .all_endpoints()
        .into_iter()
        .nth(req.id)
        .ok_or(PanelError::EndpointNotFound { id: req.id as i64 })?;
    if !candidate.protocol.is_synthesizable() {
        return Err(PanelError::InvalidRequest(format!(
            "{} endpoints cannot be applied, only vless is supported",
            candidate.protocol
        )));
    }

    let server = state.store.select_active(req.id)?;
    write_outbound(&state.config.xkeen.outbounds_file, &server)?;

    if let Err(e) = state.controller.restart() {
        warn!("Restart after selecting {} failed: {}", server.name, e);
    }
    state.watchdog.publish_status();

    Ok(Json(json!({
        "success": true,
        "server": server,
        "restarting": true,
    })))
}

/// Probe every endpoint (3 s each, in parallel) and remember the results
pub async fn check_servers(State(state): State<AppState>) -> Json<ServersResponse> {
    let checked = check_all(state.store.all_endpoints(), PROBE_TIMEOUT).await;

    if let Err(e) = state.store.record_latencies(&checked) {
        warn!("Failed to persist latencies: {}", e);
    }

    Json(ServersResponse { servers: checked })
}
