//! `BazaarServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthCounters, HealthResponse};
use crate::services::Collaborators;
use crate::shutdown::{DrainOutcome, ShutdownCoordinator};
use crate::websocket::delivery::DeliveryTracker;
use crate::websocket::presence::PresencePublisher;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::router::MessageRouter;
use crate::websocket::session::{SessionContext, run_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Context handed to every WebSocket session.
    pub sessions: Arc<SessionContext>,
    /// Pending deliveries, for health reporting.
    pub tracker: Arc<DeliveryTracker>,
    /// Lifecycle: refuses upgrades once shutdown begins and tracks sessions.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Largest inbound WebSocket message accepted.
    pub max_message_size: usize,
}

/// The Bazaar realtime server.
pub struct BazaarServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    tracker: Arc<DeliveryTracker>,
    sessions: Arc<SessionContext>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl BazaarServer {
    /// Wire registry, delivery tracker and router over `services`.
    pub fn new(config: ServerConfig, services: Collaborators) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let tracker = Arc::new(DeliveryTracker::new(
            registry.clone(),
            services.push.clone(),
            config.delivery,
            shutdown.token().child_token(),
        ));
        let router = Arc::new(MessageRouter::new(
            registry.clone(),
            tracker.clone(),
            services.messages.clone(),
        ));
        let presence = Arc::new(PresencePublisher::new(
            registry.clone(),
            services.presence.clone(),
        ));
        let sessions = Arc::new(SessionContext {
            registry: registry.clone(),
            router,
            presence,
            services,
            config: config.clone(),
            shutdown: shutdown.token(),
        });
        Self {
            config,
            registry,
            tracker,
            sessions,
            shutdown,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            sessions: self.sessions.clone(),
            tracker: self.tracker.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "http server exited with error");
            }
        });
        info!(%addr, "bazaar server listening");
        Ok(ServerHandle { addr, task })
    }

    /// Close every session, stop retries and the listener, then wait up to
    /// the configured timeout for everything to drain.
    pub async fn shutdown(&self, handle: ServerHandle) -> DrainOutcome {
        self.shutdown.begin();
        let closed = self.registry.close_all();
        info!(connections = closed, "connections closed for shutdown");
        self.shutdown
            .drain(handle.task, self.config.shutdown_timeout)
            .await
    }

    /// Live connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Pending deliveries.
    pub fn tracker(&self) -> &Arc<DeliveryTracker> {
        &self.tracker
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// A running listener.
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address (useful with port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// GET /ws?token=<bearer>
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let token = params.token.or_else(|| bearer_token(&headers));
    let ctx = state.sessions.clone();
    let lifecycle = state.shutdown.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| lifecycle.track_session(run_session(socket, token, ctx)))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = &state.sessions.registry;
    let counters = HealthCounters {
        users: registry.user_count(),
        connections: registry.connection_count(),
        pending_deliveries: state.tracker.pending_count(),
    };
    Json(health::health_check(state.start_time, counters))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}
