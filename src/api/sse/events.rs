//! Live status / log / restart stream

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::{stream, StreamExt};
use tracing::debug;

use super::NO_BUFFERING;
use crate::api::server::{wait_for_shutdown, AppState};
use crate::error::{PanelError, Result};
use crate::events::{Event, MAX_SUBSCRIBERS};

/// `GET /api/events`: current status first, then everything published on the bus
/// until the server shuts down
pub async fn events(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let subscription = state.bus.subscribe().ok_or(PanelError::TooManyClients)?;
    debug!(
        "Event stream {} opened ({}/{} slots)",
        subscription.id(),
        state.bus.subscriber_count(),
        MAX_SUBSCRIBERS
    );

    let initial = Event::status(&state.watchdog.status());
    let stream = stream::once(async move { initial })
        .chain(subscription)
        .take_until(wait_for_shutdown(state.shutdown.clone()))
        .map(|event| Ok::<_, Infallible>(event.to_sse()));

    Ok(([NO_BUFFERING], Sse::new(stream).keep_alive(KeepAlive::default())))
}
