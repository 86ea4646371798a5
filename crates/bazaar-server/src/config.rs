//! Runtime configuration for the server and its per-connection tasks.

use std::time::Duration;

use bazaar_settings::BazaarSettings;

/// Heartbeat supervisor timings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How long to wait for inbound activity after each probe.
    pub probe_timeout: Duration,
    /// Pause after a successful probe.
    pub idle_interval: Duration,
    /// Consecutive misses before the connection is closed.
    pub max_misses: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(3),
            idle_interval: Duration::from_secs(3),
            max_misses: 3,
        }
    }
}

/// Delivery tracker timings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Sleep between attempts.
    pub retry_interval: Duration,
    /// Attempts (first send included) before give-up.
    pub max_attempts: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(3),
            max_attempts: 3,
        }
    }
}

/// Configuration for the Bazaar server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Bounded outbound queue per connection.
    pub send_queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How long graceful shutdown waits for sessions to finish.
    pub shutdown_timeout: Duration,
    /// Heartbeat timings.
    pub heartbeat: HeartbeatConfig,
    /// Delivery timings.
    pub delivery: DeliveryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            send_queue_capacity: 256,
            max_message_size: 64 * 1024,
            shutdown_timeout: Duration::from_secs(10),
            heartbeat: HeartbeatConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl From<&BazaarSettings> for ServerConfig {
    fn from(settings: &BazaarSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            send_queue_capacity: settings.server.send_queue_capacity,
            max_message_size: settings.server.max_message_size,
            shutdown_timeout: settings.server.shutdown_timeout(),
            heartbeat: HeartbeatConfig {
                probe_timeout: settings.heartbeat.probe_timeout(),
                idle_interval: settings.heartbeat.idle_interval(),
                max_misses: settings.heartbeat.max_misses,
            },
            delivery: DeliveryConfig {
                retry_interval: settings.delivery.retry_interval(),
                max_attempts: settings.delivery.max_attempts,
            },
        }
    }
}

impl ServerConfig {
    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
