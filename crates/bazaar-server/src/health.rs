//! `/health` body: liveness plus registry and delivery gauges.

use std::time::Instant;

use serde::Serialize;

/// Point-in-time sizes of the registry and the delivery tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthCounters {
    /// Users with at least one live connection.
    pub users: usize,
    /// Live WebSocket connections across all users.
    pub connections: usize,
    /// Messages awaiting a delivery ack.
    pub pending_deliveries: usize,
}

/// `/health` response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: &'static str,
    /// Whole seconds since the server started.
    pub uptime_secs: u64,
    /// Gauges, serialized at the top level.
    #[serde(flatten)]
    pub counters: HealthCounters,
}

/// Snapshot for `/health`; `status` is `"ok"` whenever the server answers.
pub fn health_check(started: Instant, counters: HealthCounters) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: started.elapsed().as_secs(),
        counters,
    }
}
