//! API server using Axum
//!
//! Owns the shared panel state and serves the dashboard REST + SSE API.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use axum::extract::FromRef;
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::error::{PanelError, Result};
use crate::events::{Event, EventBus};
use crate::services::{ConnectivityProbe, Watchdog};
use crate::subscription::{FeedSource, SubscriptionStore};
use crate::xray::ProcessController;

use super::middleware::{cors_layer, JwtAuth};
use super::routes;

/// How long open connections may take to drain once shutdown starts
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Resolves once `shutdown` carries `true`; never resolves if the sender is gone
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwt_auth: JwtAuth,
    pub store: Arc<SubscriptionStore>,
    pub watchdog: Arc<Watchdog>,
    pub controller: Arc<ProcessController>,
    pub bus: EventBus,
    pub started_at: Instant,
    /// Ends long-lived streams when the server shuts down
    pub shutdown: watch::Receiver<bool>,
}

impl FromRef<AppState> for JwtAuth {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_auth.clone()
    }
}

impl AppState {
    /// Wire store, controller, watchdog and bus together and load persisted state.
    ///
    /// Restart transitions are pushed to the bus as a `restart` event followed
    /// by a fresh `status` event.
    pub fn new(
        config: Config,
        feed: Arc<dyn FeedSource>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Result<Self> {
        let jwt_auth = JwtAuth::new(&config.api.jwt_secret)
            .map_err(|_| PanelError::Internal("failed to initialise JWT key".into()))?;

        let bus = EventBus::new();
        let store = Arc::new(SubscriptionStore::new(config.data_dir.clone(), feed));
        store.load()?;

        let watchdog = Arc::new_cyclic(|weak: &Weak<Watchdog>| {
            let events = bus.clone();
            let watchdog = weak.clone();
            let controller = ProcessController::new(config.xkeen.xkeen_path.clone())
                .with_state_callback(Arc::new(move |restarting| {
                    events.publish(Event::restart(restarting));
                    if let Some(watchdog) = watchdog.upgrade() {
                        watchdog.publish_status();
                    }
                }));

            Watchdog::new(
                config.watchdog.clone(),
                config.xkeen.outbounds_file.clone(),
                store.clone(),
                Arc::new(controller),
                bus.clone(),
                probe,
            )
        });
        let controller = watchdog.controller().clone();

        Ok(Self {
            config: Arc::new(config),
            jwt_auth,
            store,
            watchdog,
            controller,
            bus,
            started_at: Instant::now(),
            shutdown: watch::channel(false).1,
        })
    }
}

/// API server
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with CORS and HTTP tracing
    pub fn build_router(&self) -> Router {
        Self::router(self.state.clone())
    }

    fn router(state: AppState) -> Router {
        let cors = cors_layer(&state.config.api.cors_origins);

        routes::create_router(state)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until `shutdown` flips
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self
            .state
            .config
            .api_addr()
            .parse()
            .map_err(|e| PanelError::InvalidConfig(format!("API address: {}", e)))?;

        let listener = TcpListener::bind(addr).await?;
        info!("API server listening on {}", addr);

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener. Event streams end when `shutdown`
    /// flips; connections still open after [`SHUTDOWN_GRACE`] are dropped.
    pub async fn serve(&self, listener: TcpListener, shutdown: watch::Receiver<bool>) -> Result<()> {
        let router = Self::router(AppState {
            shutdown: shutdown.clone(),
            ..self.state.clone()
        });

        let server = axum::serve(listener, router)
            .with_graceful_shutdown(wait_for_shutdown(shutdown.clone()))
            .into_future();
        let deadline = async move {
            wait_for_shutdown(shutdown).await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        };

        tokio::select! {
            result = server => result.map_err(|e| PanelError::Internal(e.to_string()))?,
            _ = deadline => warn!(
                "Connections still open after {}s, forcing shutdown",
                SHUTDOWN_GRACE.as_secs()
            ),
        }

        info!("API server shut down");
        Ok(())
    }
}
