//! API route definitions

use std::time::Duration;

use axum::middleware::from_extractor_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;

use super::handlers;
use super::middleware::AuthenticatedUser;
use super::server::AppState;
use super::sse;

/// Upper bound for plain REST calls; streams and `xkeen -u` are exempt
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check (no auth required)
        .route("/health", get(handlers::health::health_check))
        // Auth routes
        .route("/api/auth/login", post(handlers::auth::login))
        // Protected routes
        .nest("/api", protected_routes(state.clone()))
        .with_state(state)
}

/// Routes that require a valid token
fn protected_routes(state: AppState) -> Router<AppState> {
    let rest = Router::new()
        .route("/status", get(handlers::health::status))
        // Subscription
        .route(
            "/subscription",
            get(handlers::subscription::get_subscription)
                .post(handlers::subscription::update_subscription),
        )
        .route(
            "/subscription/refresh",
            post(handlers::subscription::refresh_subscription),
        )
        // Servers
        .route("/servers", get(handlers::servers::list_servers))
        .route("/servers/select", post(handlers::servers::select_server))
        // Daemon control
        .route("/xkeen/restart", post(handlers::xkeen::restart))
        .route("/xkeen/outbound", get(handlers::xkeen::current_outbound))
        // Watchdog
        .route("/logs", get(handlers::logs::get_logs))
        .route("/watchdog/toggle", post(handlers::watchdog::toggle))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    let long_running = Router::new()
        .route("/events", get(sse::events::events))
        .route(
            "/servers/check",
            get(sse::latency::stream_latency).post(handlers::servers::check_servers),
        )
        .route("/xkeen/update", post(handlers::xkeen::update));

    rest.merge(long_running)
        .route_layer(from_extractor_with_state::<AuthenticatedUser, AppState>(
            state,
        ))
}
