//! TCP connect latency probes for endpoints

use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::models::{Endpoint, LATENCY_UNKNOWN};

/// Per-endpoint probe timeout used by the panel
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Connect time to `host:port` in milliseconds, or `-1` when unreachable
pub async fn check_latency(host: &str, port: u16, probe_timeout: Duration) -> i64 {
    let started = Instant::now();
    match timeout(probe_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => started.elapsed().as_millis() as i64,
        Ok(Err(e)) => {
            debug!("Probe to {}:{} failed: {}", host, port, e);
            LATENCY_UNKNOWN
        }
        Err(_) => {
            debug!("Probe to {}:{} timed out", host, port);
            LATENCY_UNKNOWN
        }
    }
}

/// Probe every endpoint concurrently; the result keeps the input order
pub async fn check_all(endpoints: Vec<Endpoint>, probe_timeout: Duration) -> Vec<Endpoint> {
    let concurrency = endpoints.len().max(1);
    futures::stream::iter(endpoints)
        .map(|mut endpoint| async move {
            endpoint.latency_ms = check_latency(&endpoint.address, endpoint.port, probe_timeout).await;
            endpoint
        })
        .buffered(concurrency)
        .collect()
        .await
}

/// `(id, latency_ms)` pairs in completion order
pub fn stream_latencies(
    endpoints: Vec<Endpoint>,
    probe_timeout: Duration,
) -> impl Stream<Item = (usize, i64)> {
    let concurrency = endpoints.len().max(1);
    futures::stream::iter(endpoints)
        .map(move |endpoint| async move {
            let latency = check_latency(&endpoint.address, endpoint.port, probe_timeout).await;
            (endpoint.id, latency)
        })
        .buffer_unordered(concurrency)
}
