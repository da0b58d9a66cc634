//! Subscription feed handlers

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::api::server::AppState;
use crate::error::{PanelError, Result};
use crate::models::{Endpoint, SubscriptionSummary, UpdateSubscriptionRequest};

#[derive(Debug, Serialize)]
pub struct ServerListResponse {
    pub server_count: usize,
    pub servers: Vec<Endpoint>,
}

impl From<Vec<Endpoint>> for ServerListResponse {
    fn from(servers: Vec<Endpoint>) -> Self {
        Self {
            server_count: servers.len(),
            servers,
        }
    }
}

pub async fn get_subscription(State(state): State<AppState>) -> Json<SubscriptionSummary> {
    Json(SubscriptionSummary::from(&state.store.data()))
}

/// Set a new feed URL and download it
pub async fn update_subscription(
    State(state): State<AppState>,
    Json(req): Json<UpdateSubscriptionRequest>,
) -> Result<Json<ServerListResponse>> {
    let url = req.url.trim();
    if url.is_empty() {
        return Err(PanelError::InvalidRequest("url is required".into()));
    }

    let servers = state.store.update_url(url).await?;
    info!("Subscription set to new feed ({} endpoints)", servers.len());
    state.watchdog.publish_status();

    Ok(Json(servers.into()))
}

pub async fn refresh_subscription(
    State(state): State<AppState>,
) -> Result<Json<ServerListResponse>> {
    let servers = state.store.refresh().await?;
    state.watchdog.publish_status();
    Ok(Json(servers.into()))
}
