//! End-to-end integration tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bazaar_core::{DeliveryId, Role, UserId, UserIdentity};
use bazaar_server::services::memory::InMemoryMarketplace;
use bazaar_server::websocket::delivery::DeliveryKey;
use bazaar_server::services::{Collaborators, PresenceService, UserDirectory};
use bazaar_server::{
    BazaarServer, DeliveryConfig, HeartbeatConfig, ServerConfig, ServerHandle, ServiceError,
};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::{Instant, sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    base: String,
    server: Arc<BazaarServer>,
    market: Arc<InMemoryMarketplace>,
    handle: Option<ServerHandle>,
}

impl TestServer {
    fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={token}", self.base)
    }

    async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.server.shutdown(handle).await;
        }
    }
}

/// Fast delivery retries; heartbeat slow enough not to interfere.
fn test_config() -> ServerConfig {
    ServerConfig {
        heartbeat: HeartbeatConfig {
            probe_timeout: Duration::from_secs(2),
            idle_interval: Duration::from_secs(2),
            max_misses: 3,
        },
        delivery: DeliveryConfig {
            retry_interval: Duration::from_millis(200),
            max_attempts: 3,
        },
        shutdown_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    }
}

fn seed_market() -> Arc<InMemoryMarketplace> {
    let market = Arc::new(InMemoryMarketplace::new());
    market.add_user_with_token(
        UserIdentity::new(UserId::new(1), "alice", Role::User)
            .with_avatar(Some("avatars/alice.png".into())),
        "tok-1",
    );
    market.add_user_with_token(UserIdentity::new(UserId::new(2), "bob", Role::User), "tok-2");
    market.add_user_with_token(UserIdentity::new(UserId::new(3), "carol", Role::Admin), "tok-3");
    market
}

async fn boot_with(
    config: ServerConfig,
    services: Collaborators,
    market: Arc<InMemoryMarketplace>,
) -> TestServer {
    bazaar_logging::init_test_logging("bazaar_server=debug");
    let server = Arc::new(BazaarServer::new(config, services));
    let handle = server.listen().await.unwrap();
    TestServer {
        base: handle.addr().to_string(),
        server,
        market,
        handle: Some(handle),
    }
}

async fn boot_server(config: ServerConfig) -> TestServer {
    let market = seed_market();
    boot_with(config, Collaborators::in_memory(market.clone()), market).await
}

async fn connect_raw(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Connect and consume the `connected` frame.
async fn connect(ts: &TestServer, token: &str) -> (WsStream, Value) {
    let mut ws = connect_raw(&ts.ws_url(token)).await;
    let hello = read_json(&mut ws).await;
    assert_eq!(hello["event"], "connected");
    (ws, hello)
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read until a frame with `event`, skipping everything else.
async fn read_event(ws: &mut WsStream, event: &str) -> Value {
    loop {
        let frame = read_json(ws).await;
        if frame["event"] == event {
            return frame;
        }
    }
}

/// Try to read a JSON message within `dur`.
async fn try_read_json(ws: &mut WsStream, dur: Duration) -> Option<Value> {
    timeout(dur, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str::<Value>(&text).ok(),
                Some(Ok(_)) => {}
                _ => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Read until the server closes the socket; returns the text frames seen.
async fn read_until_closed(ws: &mut WsStream) -> Vec<Value> {
    let mut frames = Vec::new();
    timeout(TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => frames.push(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await
    .expect("server never closed the socket");
    frames
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn send_private(ws: &mut WsStream, target: i64, message: &str, time: i64) {
    send_json(
        ws,
        json!({
            "event": "private_message",
            "target_user_id": target,
            "data": {"message": message, "type": "text", "time": time}
        }),
    )
    .await;
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn connected_carries_identity() {
    let ts = boot_server(test_config()).await;
    let (_ws, hello) = connect(&ts, "tok-1").await;

    assert_eq!(hello["data"]["id"], 1);
    assert_eq!(hello["data"]["username"], "alice");
    assert_eq!(hello["data"]["role"], "user");
    assert_eq!(hello["data"]["avatar"], "avatars/alice.png");
    wait_until("registration", || ts.server.registry().is_online(UserId::new(1))).await;
    ts.stop().await;
}

#[tokio::test]
async fn missing_token_gets_one_error_then_close() {
    let ts = boot_server(test_config()).await;
    let mut ws = connect_raw(&format!("ws://{}/ws", ts.base)).await;

    let frames = read_until_closed(&mut ws).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["event"], "error");
    assert_eq!(frames[0]["data"]["reason"], "unauthorized");
    assert_eq!(ts.server.registry().connection_count(), 0);
    assert!(ts.market.presence_log().is_empty());
    ts.stop().await;
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    let ts = boot_server(test_config()).await;
    let mut ws = connect_raw(&ts.ws_url("forged")).await;

    let frames = read_until_closed(&mut ws).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["data"]["reason"], "unauthorized");
    assert_eq!(ts.server.registry().user_count(), 0);
    ts.stop().await;
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let ts = boot_server(test_config()).await;
    let mut request = format!("ws://{}/ws", ts.base).into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("authorization", "Bearer tok-2".parse().unwrap());
    let (mut ws, _) = connect_async(request).await.unwrap();

    let hello = read_json(&mut ws).await;
    assert_eq!(hello["event"], "connected");
    assert_eq!(hello["data"]["id"], 2);
    ts.stop().await;
}

/// Directory that has forgotten every user.
struct EmptyDirectory;

#[async_trait]
impl UserDirectory for EmptyDirectory {
    async fn user_exists(&self, _id: UserId) -> Result<bool, ServiceError> {
        Ok(false)
    }

    async fn avatar(&self, _id: UserId) -> Result<Option<String>, ServiceError> {
        Ok(None)
    }
}

#[tokio::test]
async fn unknown_user_is_rejected() {
    let market = seed_market();
    let mut services = Collaborators::in_memory(market.clone());
    services.users = Arc::new(EmptyDirectory);
    let ts = boot_with(test_config(), services, market).await;

    let mut ws = connect_raw(&ts.ws_url("tok-1")).await;
    let frames = read_until_closed(&mut ws).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["event"], "error");
    assert_eq!(frames[0]["data"]["reason"], "user_not_found");
    assert!(!ts.server.registry().is_online(UserId::new(1)));
    ts.stop().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Messaging
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_gets_pong() {
    let ts = boot_server(test_config()).await;
    let (mut ws, _) = connect(&ts, "tok-1").await;

    send_json(&mut ws, json!({"event": "ping"})).await;
    let pong = read_event(&mut ws, "pong").await;
    assert_eq!(pong, json!({"event": "pong"}));
    ts.stop().await;
}

#[tokio::test]
async fn acked_delivery_clears_pending_without_push() {
    let ts = boot_server(test_config()).await;
    let (mut alice, _) = connect(&ts, "tok-1").await;
    let (mut bob, _) = connect(&ts, "tok-2").await;

    send_private(&mut alice, 2, "hi", 1000).await;

    let ack = read_event(&mut alice, "ack").await;
    assert_eq!(ack["data"]["time"], 1000);

    let msg = read_event(&mut bob, "new_message").await;
    assert_eq!(msg["data"]["sender"], 1);
    assert_eq!(msg["data"]["message"], "hi");
    assert_eq!(msg["data"]["time"], 1000);
    assert_eq!(ts.server.tracker().pending_count(), 1);

    let key = DeliveryKey {
        receiver: UserId::new(2),
        delivery_id: DeliveryId::new(msg["data"]["delivery_id"].as_u64().unwrap()),
    };
    assert_eq!(ts.server.tracker().attempt_of(key), Some(1));

    let delivery_id = msg["data"]["delivery_id"].clone();
    send_json(
        &mut bob,
        json!({"event": "ack", "data": {"time": 1000, "delivery_id": delivery_id}}),
    )
    .await;
    wait_until("ack", || ts.server.tracker().pending_count() == 0).await;
    assert!(!ts.server.tracker().is_pending(key));

    // Well past the retry budget: no resend, no push, still connected.
    assert!(try_read_json(&mut bob, Duration::from_millis(800)).await.is_none());
    assert!(ts.market.pushes().is_empty());
    assert!(ts.server.registry().is_online(UserId::new(2)));

    wait_until("persist", || !ts.market.persisted().is_empty()).await;
    assert!(ts.market.persisted()[0].delivered);
    ts.stop().await;
}

#[tokio::test]
async fn timestamp_only_ack_is_accepted() {
    let ts = boot_server(test_config()).await;
    let (mut alice, _) = connect(&ts, "tok-1").await;
    let (mut bob, _) = connect(&ts, "tok-2").await;

    send_private(&mut alice, 2, "hi", 4242).await;
    let _ = read_event(&mut bob, "new_message").await;

    send_json(&mut bob, json!({"event": "ack", "data": 4242})).await;
    wait_until("ack", || ts.server.tracker().pending_count() == 0).await;
    ts.stop().await;
}

#[tokio::test]
async fn unacked_delivery_falls_back_to_push_and_disconnects() {
    let ts = boot_server(test_config()).await;
    let (mut alice, _) = connect(&ts, "tok-1").await;
    let (mut bob, _) = connect(&ts, "tok-2").await;

    send_private(&mut alice, 2, "hi", 1000).await;

    let frames = read_until_closed(&mut bob).await;
    let deliveries: Vec<&Value> = frames.iter().filter(|f| f["event"] == "new_message").collect();
    assert_eq!(deliveries.len(), 3);
    assert!(deliveries.iter().all(|f| f["data"]["delivery_id"] == deliveries[0]["data"]["delivery_id"]));

    wait_until("push", || ts.market.pushes().len() == 1).await;
    let push = &ts.market.pushes()[0];
    assert_eq!(push.sender, UserId::new(1));
    assert_eq!(push.receiver, UserId::new(2));
    assert_eq!(push.time, 1000);

    assert_eq!(ts.server.tracker().pending_count(), 0);
    assert!(!ts.server.registry().is_online(UserId::new(2)));
    assert!(ts.server.registry().is_online(UserId::new(1)));
    wait_until("offline", || ts.market.presence_of(UserId::new(2)) == Some(false)).await;
    ts.stop().await;
}

#[tokio::test]
async fn fan_out_reaches_every_device() {
    let ts = boot_server(test_config()).await;
    let (mut alice, _) = connect(&ts, "tok-1").await;
    let (mut phone, _) = connect(&ts, "tok-2").await;
    let (mut laptop, _) = connect(&ts, "tok-2").await;
    wait_until("both devices", || ts.server.registry().connections_of(UserId::new(2)).len() == 2).await;

    send_private(&mut alice, 2, "hello", 7).await;
    let a = read_event(&mut phone, "new_message").await;
    let b = read_event(&mut laptop, "new_message").await;
    assert_eq!(a, b);

    // One device acking settles the delivery for the user.
    send_json(&mut laptop, json!({"event": "ack", "data": {"time": 7}})).await;
    wait_until("ack", || ts.server.tracker().pending_count() == 0).await;
    ts.stop().await;
}

#[tokio::test]
async fn offline_recipient_gets_backlog_on_connect() {
    let ts = boot_server(test_config()).await;
    let (mut alice, _) = connect(&ts, "tok-1").await;

    send_private(&mut alice, 3, "still there?", 55).await;
    let ack = read_event(&mut alice, "ack").await;
    assert_eq!(ack["data"]["time"], 55);
    assert_eq!(ts.server.tracker().pending_count(), 0);
    wait_until("persist", || ts.market.persisted().len() == 1).await;
    assert!(!ts.market.persisted()[0].delivered);

    let (mut carol, _) = connect(&ts, "tok-3").await;
    let msg = read_event(&mut carol, "new_message").await;
    assert_eq!(msg["data"]["sender"], 1);
    assert_eq!(msg["data"]["sender_username"], "alice");
    assert_eq!(msg["data"]["message"], "still there?");
    assert!(ts.market.pushes().is_empty());
    ts.stop().await;
}

#[tokio::test]
async fn unknown_event_is_ignored() {
    let ts = boot_server(test_config()).await;
    let (mut ws, _) = connect(&ts, "tok-1").await;

    send_json(&mut ws, json!({"event": "typing", "data": {"to": 2}})).await;
    send_json(&mut ws, json!({"event": "ping"})).await;
    let _ = read_event(&mut ws, "pong").await;
    assert!(ts.server.registry().is_online(UserId::new(1)));
    ts.stop().await;
}

#[tokio::test]
async fn malformed_frame_closes_connection() {
    let ts = boot_server(test_config()).await;
    let (mut ws, _) = connect(&ts, "tok-1").await;
    wait_until("registration", || ts.server.registry().is_online(UserId::new(1))).await;

    ws.send(Message::text("{not json")).await.unwrap();
    let _ = read_until_closed(&mut ws).await;
    wait_until("unregister", || !ts.server.registry().is_online(UserId::new(1))).await;
    ts.stop().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Liveness and presence
// ─────────────────────────────────────────────────────────────────────────────

fn fast_heartbeat() -> ServerConfig {
    ServerConfig {
        heartbeat: HeartbeatConfig {
            probe_timeout: Duration::from_millis(100),
            idle_interval: Duration::from_millis(100),
            max_misses: 3,
        },
        ..test_config()
    }
}

#[tokio::test]
async fn silent_client_is_evicted() {
    let ts = boot_server(fast_heartbeat()).await;
    let (mut ws, _) = connect(&ts, "tok-1").await;

    let frames = read_until_closed(&mut ws).await;
    let pings = frames.iter().filter(|f| f["event"] == "ping").count();
    assert_eq!(pings, 3);
    wait_until("unregister", || ts.server.registry().connection_count() == 0).await;
    wait_until("offline", || ts.market.presence_of(UserId::new(1)) == Some(false)).await;
    ts.stop().await;
}

#[tokio::test]
async fn responsive_client_survives_heartbeat() {
    let ts = boot_server(fast_heartbeat()).await;
    let (mut ws, _) = connect(&ts, "tok-1").await;

    let deadline = Instant::now() + Duration::from_millis(800);
    while Instant::now() < deadline {
        if let Some(frame) = try_read_json(&mut ws, Duration::from_millis(50)).await {
            if frame["event"] == "ping" {
                send_json(&mut ws, json!({"event": "pong"})).await;
            }
        }
    }
    assert!(ts.server.registry().is_online(UserId::new(1)));
    ts.stop().await;
}

/// Presence backend that answers slower than the heartbeat budget.
struct SlowPresence(Arc<InMemoryMarketplace>);

#[async_trait]
impl PresenceService for SlowPresence {
    async fn set_presence(&self, id: UserId, online: bool) -> Result<(), ServiceError> {
        sleep(Duration::from_millis(600)).await;
        self.0.set_presence(id, online).await
    }
}

#[tokio::test]
async fn slow_presence_does_not_starve_heartbeat() {
    let market = seed_market();
    let mut services = Collaborators::in_memory(market.clone());
    services.presence = Arc::new(SlowPresence(market.clone()));
    let ts = boot_with(fast_heartbeat(), services, market).await;
    let (mut ws, _) = connect(&ts, "tok-1").await;

    let mut pings = 0;
    let deadline = Instant::now() + Duration::from_millis(1000);
    while Instant::now() < deadline {
        if let Some(frame) = try_read_json(&mut ws, Duration::from_millis(50)).await {
            if frame["event"] == "ping" {
                pings += 1;
                send_json(&mut ws, json!({"event": "pong"})).await;
            }
        }
    }
    assert!(pings >= 3, "only {pings} pings");
    assert!(ts.server.registry().is_online(UserId::new(1)));
    wait_until("online", || ts.market.presence_of(UserId::new(1)) == Some(true)).await;
    ts.stop().await;
}

#[tokio::test]
async fn forced_disconnect_publishes_offline_once() {
    let ts = boot_server(test_config()).await;
    let (mut alice, _) = connect(&ts, "tok-1").await;
    let (mut phone, _) = connect(&ts, "tok-2").await;
    let (mut laptop, _) = connect(&ts, "tok-2").await;
    wait_until("both devices", || ts.server.registry().connections_of(UserId::new(2)).len() == 2).await;

    send_private(&mut alice, 2, "anyone?", 31).await;
    let _ = read_until_closed(&mut phone).await;
    let _ = read_until_closed(&mut laptop).await;
    wait_until("offline", || ts.market.presence_of(UserId::new(2)) == Some(false)).await;

    // Give any straggling teardown time to publish again.
    sleep(Duration::from_millis(200)).await;
    let bob: Vec<bool> = ts
        .market
        .presence_log()
        .into_iter()
        .filter(|(id, _)| *id == UserId::new(2))
        .map(|(_, online)| online)
        .collect();
    assert_eq!(bob, vec![true, false]);
    ts.stop().await;
}

#[tokio::test]
async fn presence_follows_last_device() {
    let ts = boot_server(test_config()).await;
    let (mut first, _) = connect(&ts, "tok-2").await;
    let (second, _) = connect(&ts, "tok-2").await;
    wait_until("online", || ts.market.presence_of(UserId::new(2)) == Some(true)).await;

    first.close(None).await.unwrap();
    wait_until("one device", || ts.server.registry().connections_of(UserId::new(2)).len() == 1).await;
    assert_eq!(ts.market.presence_of(UserId::new(2)), Some(true));

    drop(second);
    wait_until("offline", || ts.market.presence_of(UserId::new(2)) == Some(false)).await;
    assert!(!ts.server.registry().is_online(UserId::new(2)));
    ts.stop().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_live_counts() {
    let ts = boot_server(test_config()).await;
    let (_a, _) = connect(&ts, "tok-1").await;
    let (_b, _) = connect(&ts, "tok-1").await;
    wait_until("both devices", || ts.server.registry().connection_count() == 2).await;

    let body: Value = reqwest::get(format!("http://{}/health", ts.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["users"], 1);
    assert_eq!(body["connections"], 2);
    assert_eq!(body["pending_deliveries"], 0);
    ts.stop().await;
}

#[tokio::test]
async fn graceful_shutdown_closes_sessions() {
    let ts = boot_server(test_config()).await;
    let (mut alice, _) = connect(&ts, "tok-1").await;
    let (mut bob, _) = connect(&ts, "tok-2").await;
    send_private(&mut alice, 2, "bye", 1).await;
    let _ = read_event(&mut bob, "new_message").await;

    let server = ts.server.clone();
    let market = ts.market.clone();
    ts.stop().await;

    let _ = read_until_closed(&mut alice).await;
    let _ = read_until_closed(&mut bob).await;
    assert_eq!(server.registry().connection_count(), 0);
    assert_eq!(server.shutdown_coordinator().active_sessions(), 0);
    // Retries stop with the server; nothing is pushed.
    sleep(Duration::from_millis(700)).await;
    assert!(market.pushes().is_empty());
}
