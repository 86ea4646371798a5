//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a global
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants shared by the websocket modules.

/// WebSocket connections registered (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Rejected handshakes (counter, labels: reason).
pub const WS_HANDSHAKE_FAILURES_TOTAL: &str = "ws_handshake_failures_total";
/// Outbound frames dropped on a full or closed queue (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Inbound frames decoded (counter, labels: event).
pub const WS_FRAMES_RECEIVED_TOTAL: &str = "ws_frames_received_total";
/// Inbound frames that failed to decode (counter).
pub const WS_MALFORMED_FRAMES_TOTAL: &str = "ws_malformed_frames_total";
/// Connections closed by the heartbeat supervisor (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "heartbeat_timeouts_total";
/// Private messages routed (counter, labels: online).
pub const MESSAGES_ROUTED_TOTAL: &str = "messages_routed_total";
/// Deliveries awaiting an ack (gauge).
pub const DELIVERIES_PENDING: &str = "deliveries_pending";
/// Delivery re-sends (counter).
pub const DELIVERY_RETRIES_TOTAL: &str = "delivery_retries_total";
/// Deliveries acknowledged (counter).
pub const DELIVERY_ACKS_TOTAL: &str = "delivery_acks_total";
/// Deliveries given up on (counter).
pub const DELIVERY_GIVE_UPS_TOTAL: &str = "delivery_give_ups_total";
/// Message persistence failures (counter).
pub const PERSIST_FAILURES_TOTAL: &str = "persist_failures_total";
/// Push notification failures (counter).
pub const PUSH_FAILURES_TOTAL: &str = "push_failures_total";
