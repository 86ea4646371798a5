//! WebSocket session lifecycle, from upgrade through teardown.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bazaar_core::{ErrorPayload, InboundEvent, OutboundEvent, UserId, UserIdentity};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, instrument, warn};

use super::connection::{CloseReason, Connection};
use super::heartbeat::run_heartbeat;
use super::presence::PresencePublisher;
use super::registry::ConnectionRegistry;
use super::router::MessageRouter;
use crate::config::ServerConfig;
use crate::errors::SessionError;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
    WS_HANDSHAKE_FAILURES_TOTAL, WS_MALFORMED_FRAMES_TOTAL,
};
use crate::services::Collaborators;

/// Everything a session needs, shared by all sessions.
pub struct SessionContext {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Inbound dispatch and fan-out.
    pub router: Arc<MessageRouter>,
    /// Marketplace collaborators.
    pub services: Collaborators,
    /// Per-user presence publication.
    pub presence: Arc<PresencePublisher>,
    /// Queue sizes and heartbeat timings.
    pub config: ServerConfig,
    /// Parent of every connection's cancellation token.
    pub shutdown: CancellationToken,
}

/// Resolve and verify the identity behind `token`.
///
/// The avatar lookup is best-effort: on failure the identity keeps
/// whatever avatar the token carried.
pub async fn authenticate(
    token: Option<&str>,
    services: &Collaborators,
) -> Result<UserIdentity, SessionError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(SessionError::MissingToken)?;
    let identity = services
        .tokens
        .validate(token)
        .await
        .map_err(SessionError::Unauthorized)?;

    match services.users.user_exists(identity.id).await {
        Ok(true) => {}
        Ok(false) => return Err(SessionError::UserNotFound(identity.id)),
        Err(e) => return Err(SessionError::Directory(e)),
    }

    match services.users.avatar(identity.id).await {
        Ok(Some(avatar)) => Ok(identity.with_avatar(Some(avatar))),
        Ok(None) => Ok(identity),
        Err(e) => {
            warn!(user_id = %identity.id, error = %e, "avatar lookup failed");
            Ok(identity)
        }
    }
}

/// Run a WebSocket session for a freshly upgraded socket.
///
/// 1. Authenticates `token`; on failure sends one `error` envelope and closes
/// 2. Registers the connection and sends `connected`
/// 3. Publishes presence and delivers the offline backlog in the
///    background, so the read loop is already observing activity
/// 4. Runs the writer, heartbeat and read loop until any of them closes
///    the connection
/// 5. Tears down exactly once: unregister, presence, close frame
#[instrument(skip_all, fields(user_id, conn_id))]
pub async fn run_session(mut ws: WebSocket, token: Option<String>, ctx: Arc<SessionContext>) {
    let identity = match authenticate(token.as_deref(), &ctx.services).await {
        Ok(identity) => identity,
        Err(e) => {
            reject(&mut ws, &e).await;
            return;
        }
    };

    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(ctx.config.send_queue_capacity);
    let connection = Arc::new(Connection::new(
        identity.clone(),
        send_tx,
        ctx.shutdown.child_token(),
    ));
    let user_id = connection.user_id();
    let span = Span::current();
    let _ = span.record("user_id", tracing::field::display(user_id));
    let _ = span.record("conn_id", tracing::field::display(connection.id()));

    let writer = tokio::spawn(write_loop(ws_tx, send_rx, connection.clone()));

    // Queued ahead of registration so it is always the first frame.
    let _ = connection.send_event(&OutboundEvent::Connected(identity));
    ctx.registry.register(connection.clone());
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    info!(devices = ctx.registry.connections_of(user_id).len(), "client connected");

    let heartbeat = tokio::spawn(run_heartbeat(connection.clone(), ctx.config.heartbeat));

    let announced = tokio::spawn(announce(ctx.clone(), user_id).in_current_span());

    let exit = read_loop(&mut ws_rx, &connection, &ctx.router).await;
    let _ = connection.close(exit);
    let reason = connection.close_reason().unwrap_or(CloseReason::Shutdown);

    let _ = heartbeat.await;
    let _ = writer.await;
    let _ = announced.await;
    teardown(&ctx, &connection).await;

    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    info!(%reason, dropped = connection.drop_count(), "client disconnected");
}

async fn reject(ws: &mut WebSocket, error: &SessionError) {
    counter!(WS_HANDSHAKE_FAILURES_TOTAL, "reason" => error.reason()).increment(1);
    warn!(error = %error, reason = error.reason(), "handshake rejected");
    let event = OutboundEvent::Error(ErrorPayload::new(error.reason(), error.to_string()));
    if let Ok(json) = event.to_json() {
        let _ = ws.send(Message::Text(json.into())).await;
    }
    let _ = ws.send(Message::Close(None)).await;
}

/// Read frames until the client leaves, a frame is malformed, or the
/// connection is closed elsewhere. Returns the reason to record.
async fn read_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    connection: &Connection,
    router: &MessageRouter,
) -> CloseReason {
    loop {
        let frame = tokio::select! {
            () = connection.cancelled() => {
                return connection.close_reason().unwrap_or(CloseReason::Shutdown);
            }
            frame = ws_rx.next() => frame,
        };

        let msg = match frame {
            None => return CloseReason::ClientClosed,
            Some(Err(e)) => {
                debug!(error = %e, "socket read failed");
                return CloseReason::ReadError;
            }
            Some(Ok(msg)) => msg,
        };
        connection.mark_alive();

        let parsed = match msg {
            Message::Text(text) => InboundEvent::parse(text.as_str()),
            // Some clients send JSON in binary frames.
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => InboundEvent::parse(text),
                Err(_) => {
                    counter!(WS_MALFORMED_FRAMES_TOTAL).increment(1);
                    warn!(len = data.len(), "non-UTF-8 binary frame");
                    return CloseReason::Malformed;
                }
            },
            Message::Close(_) => return CloseReason::ClientClosed,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match parsed {
            Ok(event) => router.dispatch(connection, event),
            Err(e) => {
                counter!(WS_MALFORMED_FRAMES_TOTAL).increment(1);
                warn!(error = %e, "malformed frame");
                return CloseReason::Malformed;
            }
        }
    }
}

/// Drain the outbound queue into the socket until the connection closes.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<Connection>,
) {
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Some(text) => {
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        let _ = connection.close(CloseReason::WriteError);
                        break;
                    }
                }
                None => break,
            },
            () = connection.cancelled() => break,
        }
    }

    // Flush what was queued before the close, then say goodbye.
    while let Ok(text) = rx.try_recv() {
        if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = ws_tx.close().await;
}

/// Publish online and hand over messages stored while the user was away.
async fn announce(ctx: Arc<SessionContext>, user_id: UserId) {
    let _ = ctx.presence.sync(user_id).await;
    match ctx.services.messages.fetch_undelivered(user_id).await {
        Ok(backlog) if !backlog.is_empty() => {
            let count = ctx.router.deliver_backlog(user_id, backlog);
            debug!(count, "offline backlog delivered");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "failed to fetch undelivered messages"),
    }
}

/// Unregister; presence goes offline once the user's last device is gone.
async fn teardown(ctx: &SessionContext, connection: &Connection) {
    let user_id = connection.user_id();
    let removed = ctx.registry.unregister(user_id, connection.id());
    if ctx.presence.sync(user_id).await == Some(false) {
        debug!(removed, "last device gone, user offline");
    }
}
