//! Heartbeat liveness supervision.

use std::sync::Arc;

use bazaar_core::OutboundEvent;
use metrics::counter;
use tokio::time;
use tracing::{debug, info, trace};

use super::connection::{CloseReason, Connection};
use crate::config::HeartbeatConfig;
use crate::metrics::HEARTBEAT_TIMEOUTS_TOTAL;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stayed silent for `max_misses` consecutive probes.
    TimedOut,
    /// The connection was closed by another path.
    Cancelled,
}

/// Probe `connection` until it goes silent or is closed.
///
/// Each cycle sends a `ping` envelope and waits up to `probe_timeout` for
/// any inbound activity (not only `pong`). Activity resets the miss count
/// and pauses for `idle_interval`; a timeout counts a miss and probes
/// again immediately. On `max_misses` consecutive misses the connection is
/// closed with [`CloseReason::HeartbeatTimeout`].
pub async fn run_heartbeat(connection: Arc<Connection>, config: HeartbeatConfig) -> HeartbeatResult {
    let mut misses: u32 = 0;

    loop {
        // Register interest before probing so a fast reply is not lost.
        let activity = connection.activity();
        if !connection.send_event(&OutboundEvent::Ping) {
            debug!(conn_id = %connection.id(), "heartbeat probe not queued");
        }

        tokio::select! {
            () = connection.cancelled() => return HeartbeatResult::Cancelled,
            waited = time::timeout(config.probe_timeout, activity) => {
                if waited.is_ok() {
                    misses = 0;
                    trace!(conn_id = %connection.id(), "heartbeat ok");
                    tokio::select! {
                        () = connection.cancelled() => return HeartbeatResult::Cancelled,
                        () = time::sleep(config.idle_interval) => {}
                    }
                } else {
                    misses += 1;
                    debug!(conn_id = %connection.id(), misses, max = config.max_misses, "heartbeat missed");
                    if misses >= config.max_misses {
                        if connection.close(CloseReason::HeartbeatTimeout) {
                            counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                            info!(
                                conn_id = %connection.id(),
                                user_id = %connection.user_id(),
                                misses,
                                idle_ms = u64::try_from(connection.idle_for().as_millis()).unwrap_or(u64::MAX),
                                "closing unresponsive connection"
                            );
                        }
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
        }
    }
}
