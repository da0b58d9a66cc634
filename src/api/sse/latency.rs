//! Streaming latency sweep

use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::IntoResponse;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;

use super::NO_BUFFERING;
use crate::api::server::{wait_for_shutdown, AppState};
use crate::xray::{stream_latencies, PROBE_TIMEOUT};

/// Pause between `done` and `close` so the browser sees the final event
pub const CLOSE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct LatencyUpdate {
    id: usize,
    latency_ms: i64,
}

type SseStream = BoxStream<'static, Result<SseEvent, axum::Error>>;

/// `GET /api/servers/check`: one `latency` event per endpoint as probes finish,
/// then `done`, then `close`. Cut short on server shutdown.
pub async fn stream_latency(State(state): State<AppState>) -> impl IntoResponse {
    let servers = state.store.all_endpoints();
    let done = stream::once(async {
        SseEvent::default()
            .event("done")
            .json_data(json!({ "complete": true }))
    });

    let body: SseStream = if servers.is_empty() {
        done.boxed()
    } else {
        let probes = stream_latencies(servers, PROBE_TIMEOUT).map(|(id, latency_ms)| {
            SseEvent::default()
                .event("latency")
                .json_data(LatencyUpdate { id, latency_ms })
        });
        let close = stream::once(async {
            tokio::time::sleep(CLOSE_DELAY).await;
            Ok(SseEvent::default().event("close").data("{}"))
        });

        probes.chain(done).chain(close).boxed()
    };

    let body = body.take_until(wait_for_shutdown(state.shutdown.clone()));
    ([NO_BUFFERING], Sse::new(body))
}
