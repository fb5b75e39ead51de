//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the WebSocket, status and health handlers
//! - Wire up middleware (tracing)
//! - Start the upstream subscriber loop alongside the listener
//! - Stop everything on shutdown, bounded by the grace period

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::http::websocket::ws_handler;
use crate::lifecycle::Shutdown;
use crate::relay::{Broadcaster, ConnectionLifecycleHandler, ConnectionRegistry};
use crate::upstream::{Connector, SubscriberLoop, SubscriberState, ZmqConnector};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<ConnectionLifecycleHandler>,
    pub upstream_state: watch::Receiver<SubscriberState>,
    pub connection_limit: Option<Arc<Semaphore>>,
    pub shutdown: Shutdown,
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct RelayStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub clients: usize,
    pub upstream: &'static str,
}

/// The relay: WebSocket listener plus upstream subscriber.
pub struct RelayServer<C: Connector = ZmqConnector> {
    router: Router,
    config: RelayConfig,
    registry: Arc<ConnectionRegistry>,
    subscriber: SubscriberLoop<C>,
    shutdown: Shutdown,
}

impl RelayServer<ZmqConnector> {
    /// Create a relay that subscribes to a ZeroMQ publisher.
    pub fn new(config: RelayConfig, shutdown: Shutdown) -> Self {
        let connector = ZmqConnector::from_config(&config.upstream);
        Self::with_connector(config, connector, shutdown)
    }
}

impl<C> RelayServer<C>
where
    C: Connector + 'static,
{
    /// Create a relay that reads the upstream feed through `connector`.
    pub fn with_connector(config: RelayConfig, connector: C, shutdown: Shutdown) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let handler = Arc::new(ConnectionLifecycleHandler::new(
            Arc::clone(&registry),
            &config.broadcast,
        ));
        let subscriber = SubscriberLoop::from_config(connector, &config.upstream, broadcaster);

        let state = AppState {
            handler,
            upstream_state: subscriber.watch_state(),
            connection_limit: (config.listener.max_connections > 0)
                .then(|| Arc::new(Semaphore::new(config.listener.max_connections))),
            shutdown: shutdown.clone(),
        };

        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            registry,
            subscriber,
            shutdown,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &RelayConfig, state: AppState) -> Router {
        Router::new()
            .route(&config.listener.ws_path, get(ws_handler))
            .route("/status", get(status_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Replace the subscriber's delay function.
    pub fn with_backoff<F>(mut self, backoff: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.subscriber = self.subscriber.with_backoff(backoff);
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn upstream_state(&self) -> watch::Receiver<SubscriberState> {
        self.subscriber.watch_state()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Serve clients on `listener` and relay the upstream feed until shutdown.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let RelayServer {
            router,
            config,
            subscriber,
            shutdown,
            ..
        } = self;

        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            ws_path = %config.listener.ws_path,
            upstream = %config.upstream.endpoint,
            "Relay server starting"
        );

        let subscriber = tokio::spawn(subscriber.run(shutdown.subscribe()));

        let mut signal = shutdown.subscribe();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.recv().await })
            .await?;

        tracing::info!("HTTP server stopped, waiting for connections to close");
        let grace = Duration::from_secs(config.shutdown.grace_period_secs);
        let drained = tokio::time::timeout(grace, async {
            if let Err(e) = subscriber.await {
                tracing::error!(error = %e, "Subscriber task failed");
            }
            shutdown.drained().await;
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                grace_period = ?grace,
                remaining = shutdown.receiver_count(),
                "Grace period elapsed with tasks still running"
            );
        }

        tracing::info!("Relay server stopped");
        Ok(())
    }
}

async fn status_handler(State(state): State<AppState>) -> Json<RelayStatus> {
    let upstream = *state.upstream_state.borrow();
    Json(RelayStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if upstream == SubscriberState::Receiving {
            "operational"
        } else {
            "degraded"
        },
        clients: state.handler.registry().len(),
        upstream: upstream.as_str(),
    })
}

async fn health_handler() -> &'static str {
    "ok"
}
