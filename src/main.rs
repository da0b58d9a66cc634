//! XKeen Panel - Entry Point
//!
//! Starts the watchdog and the API server with graceful shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use xkeen_panel::api::{ApiServer, AppState};
use xkeen_panel::config::{Config, LogConfig};
use xkeen_panel::services::{HttpProbe, WatchdogHandle};
use xkeen_panel::subscription::HttpFeedSource;

#[tokio::main]
async fn main() -> xkeen_panel::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting XKeen Panel");

    if config.api.jwt_secret.is_empty() {
        warn!("JWT_SECRET not set; sessions will not survive a restart");
    }

    let state = AppState::new(
        config.clone(),
        Arc::new(HttpFeedSource::new()?),
        Arc::new(HttpProbe::new()?),
    )?;
    info!(
        "Loaded subscription state ({} endpoints)",
        state.store.all_endpoints().len()
    );

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start watchdog
    let (watchdog_handle, watchdog_shutdown) = WatchdogHandle::new();
    let watchdog = state.watchdog.clone();
    let watchdog_task = tokio::spawn(async move {
        watchdog.run(watchdog_shutdown).await;
    });

    // Start API server
    let api_server = ApiServer::new(state);
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("Panel started on {}", config.api_addr());

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    watchdog_handle.shutdown();

    let _ = tokio::join!(api_task, watchdog_task);

    info!("XKeen Panel stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("xkeen_panel={},tower_http=debug", log.level))
    });
    let json = log.format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
