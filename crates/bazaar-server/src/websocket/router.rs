//! Inbound event dispatch and outbound fan-out.

use std::sync::Arc;

use bazaar_core::{Ack, InboundEvent, NewMessage, OutboundEvent, PrivateMessage, SendAck, UserId};
use metrics::counter;
use tracing::{debug, warn};

use super::connection::Connection;
use super::delivery::DeliveryTracker;
use super::registry::ConnectionRegistry;
use crate::metrics::{MESSAGES_ROUTED_TOTAL, PERSIST_FAILURES_TOTAL, WS_FRAMES_RECEIVED_TOTAL};
use crate::services::MessageStore;

/// Routes decoded frames from one connection to the rest of the system.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    tracker: Arc<DeliveryTracker>,
    store: Arc<dyn MessageStore>,
}

impl MessageRouter {
    /// Create a router over shared registry and tracker instances.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        tracker: Arc<DeliveryTracker>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            registry,
            tracker,
            store,
        }
    }

    /// Handle one inbound event from `connection`.
    pub fn dispatch(&self, connection: &Connection, event: InboundEvent) {
        counter!(WS_FRAMES_RECEIVED_TOTAL, "event" => event_label(&event)).increment(1);
        match event {
            InboundEvent::Ping => {
                let _ = connection.send_event(&OutboundEvent::Pong);
            }
            InboundEvent::Pong => {}
            InboundEvent::PrivateMessage(message) => self.route_private(connection, message),
            InboundEvent::Ack(ack) => self.acknowledge(connection, &ack),
            InboundEvent::Unknown(name) => {
                debug!(conn_id = %connection.id(), event = %name, "ignoring unknown event");
            }
        }
    }

    /// Send `event` to every live connection of `user_id`.
    pub fn send_to_user(&self, user_id: UserId, event: &OutboundEvent) -> usize {
        self.registry.send_to_user(user_id, event)
    }

    /// Push messages stored while `user_id` was offline.
    pub fn deliver_backlog(&self, user_id: UserId, messages: Vec<NewMessage>) -> usize {
        let count = messages.len();
        for message in messages {
            let _ = self.send_to_user(user_id, &OutboundEvent::NewMessage(message));
        }
        count
    }

    fn route_private(&self, connection: &Connection, message: PrivateMessage) {
        let sender = connection.identity();
        let _ = connection.send_event(&OutboundEvent::Ack(SendAck { time: message.time }));

        let online = self.registry.is_online(message.target);
        counter!(MESSAGES_ROUTED_TOTAL, "online" => if online { "true" } else { "false" })
            .increment(1);
        if online {
            let key = self.tracker.track(sender, message.clone());
            debug!(
                sender = %sender.id,
                receiver = %message.target,
                delivery_id = %key.delivery_id,
                "private message delivered live"
            );
        } else {
            debug!(sender = %sender.id, receiver = %message.target, "recipient offline, storing only");
        }

        let store = Arc::clone(&self.store);
        let sender = sender.clone();
        let _ = tokio::spawn(async move {
            if let Err(e) = store.persist(&sender, online, &message).await {
                counter!(PERSIST_FAILURES_TOTAL).increment(1);
                warn!(sender = %sender.id, receiver = %message.target, error = %e, "failed to persist message");
            }
        });
    }

    fn acknowledge(&self, connection: &Connection, ack: &Ack) {
        let removed = self.tracker.acknowledge(connection.user_id(), ack);
        if removed == 0 {
            debug!(
                user_id = %connection.user_id(),
                time = ack.time,
                delivery_id = ?ack.delivery_id,
                "ack matched nothing"
            );
        }
    }
}

fn event_label(event: &InboundEvent) -> &'static str {
    match event {
        InboundEvent::Ping => "ping",
        InboundEvent::Pong => "pong",
        InboundEvent::PrivateMessage(_) => "private_message",
        InboundEvent::Ack(_) => "ack",
        InboundEvent::Unknown(_) => "unknown",
    }
}
