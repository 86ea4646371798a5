//! Server, heartbeat, and delivery settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server network and socket settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` to auto-assign).
    pub port: u16,
    /// Bounded outbound queue per connection.
    pub send_queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How long graceful shutdown waits for sessions to drain.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            send_queue_capacity: 256,
            max_message_size: 64 * 1024,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl ServerSettings {
    /// Graceful shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Heartbeat supervisor settings.
///
/// A connection is closed after `max_misses` consecutive probes with no
/// inbound activity within `probe_timeout_ms` each.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// How long to wait for activity after each `ping`.
    pub probe_timeout_ms: u64,
    /// Pause between a successful probe and the next one.
    pub idle_interval_ms: u64,
    /// Consecutive misses before the connection is closed.
    pub max_misses: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 3000,
            idle_interval_ms: 3000,
            max_misses: 3,
        }
    }
}

impl HeartbeatSettings {
    /// Probe timeout as a `Duration`.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Idle interval as a `Duration`.
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

/// Delivery tracker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
    /// Sleep between delivery attempts.
    pub retry_interval_ms: u64,
    /// Attempts (including the first send) before giving up.
    pub max_attempts: u32,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            retry_interval_ms: 3000,
            max_attempts: 3,
        }
    }
}

impl DeliverySettings {
    /// Retry interval as a `Duration`.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}
