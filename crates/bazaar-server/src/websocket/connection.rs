//! Per-connection state shared by the session, heartbeat and registry.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bazaar_core::{ConnectionId, OutboundEvent, UserId, UserIdentity};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::sync::futures::Notified;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;

use crate::metrics::WS_SEND_DROPS_TOTAL;

/// Why a connection was closed. The first recorded reason wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or the stream ended.
    ClientClosed,
    /// Socket read failed.
    ReadError,
    /// Socket write failed.
    WriteError,
    /// Inbound frame could not be decoded.
    Malformed,
    /// Heartbeat supervisor gave up.
    HeartbeatTimeout,
    /// Delivery tracker exhausted its retries for this user.
    ForcedDisconnect,
    /// Server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ReadError => "read_error",
            Self::WriteError => "write_error",
            Self::Malformed => "malformed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ForcedDisconnect => "forced_disconnect",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live, authenticated WebSocket connection.
pub struct Connection {
    id: ConnectionId,
    identity: UserIdentity,
    /// Outbound queue drained by the session's writer task.
    tx: mpsc::Sender<Arc<String>>,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
    activity: Notify,
    cancel: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection for `identity` writing into `tx`.
    ///
    /// `cancel` is usually a child of the server shutdown token.
    pub fn new(
        identity: UserIdentity,
        tx: mpsc::Sender<Arc<String>>,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            identity,
            tx,
            connected_at: now,
            last_activity: Mutex::new(now),
            activity: Notify::new(),
            cancel,
            close_reason: Mutex::new(None),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Unique connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Authenticated identity.
    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    /// Owning user.
    pub fn user_id(&self) -> UserId {
        self.identity.id
    }

    /// Queue a serialized frame.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!(WS_SEND_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Serialize an event and queue it.
    pub fn send_event(&self, event: &OutboundEvent) -> bool {
        match event.to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, event = event.name(), error = %e, "failed to serialize event");
                false
            }
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity and wake a waiting heartbeat probe.
    pub fn mark_alive(&self) {
        *self.last_activity.lock() = Instant::now();
        self.activity.notify_waiters();
    }

    /// Future resolving on the next [`mark_alive`](Self::mark_alive).
    ///
    /// Activity is observed from the moment this is called, even before
    /// the future is first polled.
    pub fn activity(&self) -> Notified<'_> {
        self.activity.notified()
    }

    /// Time since the last inbound activity (or establishment).
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Close the connection, recording `reason` if none was recorded yet.
    ///
    /// Returns `true` for the call that actually closed it.
    pub fn close(&self, reason: CloseReason) -> bool {
        let first = {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        };
        self.cancel.cancel();
        first
    }

    /// Whether the connection has been closed (or its parent token fired).
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Recorded close reason, if closed via [`close`](Self::close).
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Future resolving when the connection is closed.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.identity.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_connection(
    user: i64,
    capacity: usize,
) -> (Arc<Connection>, mpsc::Receiver<Arc<String>>) {
    let (tx, rx) = mpsc::channel(capacity);
    let identity = UserIdentity::new(UserId::new(user), format!("user{user}"), Default::default());
    (
        Arc::new(Connection::new(identity, tx, CancellationToken::new())),
        rx,
    )
}
