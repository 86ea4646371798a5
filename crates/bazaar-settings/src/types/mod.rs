//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may set any subset of fields and the rest keep their defaults.

mod integrations;
mod logging;
mod server;

pub use integrations::*;
pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the Bazaar realtime server.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "heartbeat": { "probeTimeoutMs": 5000 },
///   "auth": { "jwtSecret": "..." }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BazaarSettings {
    /// Network and socket settings.
    pub server: ServerSettings,
    /// Per-connection liveness probing.
    pub heartbeat: HeartbeatSettings,
    /// Private-message delivery retries.
    pub delivery: DeliverySettings,
    /// Bearer-token validation.
    pub auth: AuthSettings,
    /// Marketplace backend the server calls into.
    pub marketplace: MarketplaceSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl BazaarSettings {
    /// Reject values that would make the server misbehave.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            (self.heartbeat.probe_timeout_ms == 0, "heartbeat.probeTimeoutMs"),
            (self.heartbeat.max_misses == 0, "heartbeat.maxMisses"),
            (self.delivery.retry_interval_ms == 0, "delivery.retryIntervalMs"),
            (self.delivery.max_attempts == 0, "delivery.maxAttempts"),
            (self.server.send_queue_capacity == 0, "server.sendQueueCapacity"),
            (self.marketplace.timeout_ms == 0, "marketplace.timeoutMs"),
        ];
        match zero.into_iter().find(|(is_zero, _)| *is_zero) {
            Some((_, key)) => Err(SettingsError::OutOfRange {
                key,
                reason: "must be > 0",
            }),
            None => Ok(()),
        }
    }
}
