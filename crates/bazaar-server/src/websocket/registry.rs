//! User to live-connections registry and fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use bazaar_core::{ConnectionId, OutboundEvent, UserId};
use metrics::gauge;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::connection::{CloseReason, Connection};
use crate::metrics::WS_CONNECTIONS_ACTIVE;

/// Tracks every live connection, grouped by user.
///
/// A user with no live connections has no entry. The lock is never held
/// while writing to a connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    users: Mutex<HashMap<UserId, Vec<Arc<Connection>>>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection under its user. Users may hold several at once.
    pub fn register(&self, connection: Arc<Connection>) {
        let user_id = connection.user_id();
        let conn_id = connection.id().clone();
        let count = {
            let mut users = self.users.lock();
            let conns = users.entry(user_id).or_default();
            conns.push(connection);
            conns.len()
        };
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        debug!(%user_id, %conn_id, connections = count, "connection registered");
    }

    /// Remove exactly `conn_id` from `user_id`.
    ///
    /// Returns `false` if it was not registered.
    pub fn unregister(&self, user_id: UserId, conn_id: &ConnectionId) -> bool {
        let removed = {
            let mut users = self.users.lock();
            let Some(conns) = users.get_mut(&user_id) else {
                return false;
            };
            let before = conns.len();
            conns.retain(|c| c.id() != conn_id);
            let removed = conns.len() != before;
            if conns.is_empty() {
                let _ = users.remove(&user_id);
            }
            removed
        };
        if removed {
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
            debug!(%user_id, %conn_id, "connection unregistered");
        }
        removed
    }

    /// Snapshot of `user_id`'s live connections.
    pub fn connections_of(&self, user_id: UserId) -> Vec<Arc<Connection>> {
        self.users
            .lock()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `user_id` has any live connection.
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.users.lock().contains_key(&user_id)
    }

    /// Send `event` to every connection of `user_id`.
    ///
    /// Serializes once; each write is independent. Returns how many
    /// connections accepted the frame. No-op for offline users.
    pub fn send_to_user(&self, user_id: UserId, event: &OutboundEvent) -> usize {
        let conns = self.connections_of(user_id);
        if conns.is_empty() {
            return 0;
        }
        let json = match event.to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(%user_id, event = event.name(), error = %e, "failed to serialize event");
                return 0;
            }
        };
        let mut delivered = 0;
        for conn in &conns {
            if conn.send(json.clone()) {
                delivered += 1;
            } else {
                warn!(%user_id, conn_id = %conn.id(), event = event.name(), "failed to enqueue frame");
            }
        }
        debug!(%user_id, event = event.name(), recipients = conns.len(), delivered, "fan-out");
        delivered
    }

    /// Close and unregister every connection of `user_id`.
    ///
    /// Presence is left to each connection's own teardown.
    pub fn disconnect_user(&self, user_id: UserId) -> usize {
        let conns = self.users.lock().remove(&user_id).unwrap_or_default();
        for conn in &conns {
            let _ = conn.close(CloseReason::ForcedDisconnect);
        }
        if !conns.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(conns.len() as f64);
            info!(%user_id, connections = conns.len(), "user forcibly disconnected");
        }
        conns.len()
    }

    /// Close every connection (server shutdown). Sessions unregister themselves.
    pub fn close_all(&self) -> usize {
        let conns: Vec<Arc<Connection>> = self.users.lock().values().flatten().cloned().collect();
        for conn in &conns {
            let _ = conn.close(CloseReason::Shutdown);
        }
        conns.len()
    }

    /// Users with at least one live connection.
    pub fn user_count(&self) -> usize {
        self.users.lock().len()
    }

    /// Live connections across all users.
    pub fn connection_count(&self) -> usize {
        self.users.lock().values().map(Vec::len).sum()
    }
}
