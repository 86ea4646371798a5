//! Realtime wire protocol.
//!
//! Every frame is a JSON envelope `{event, target_user_id?, data?}`.
//! Inbound frames are decoded into [`InboundEvent`], outbound frames are
//! built from [`OutboundEvent`]; both carry statically typed payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::identity::UserIdentity;
use crate::ids::{DeliveryId, UserId};

/// Event names on the wire.
pub mod events {
    /// Liveness probe (both directions).
    pub const PING: &str = "ping";
    /// Liveness reply (both directions).
    pub const PONG: &str = "pong";
    /// Client -> server private message.
    pub const PRIVATE_MESSAGE: &str = "private_message";
    /// Send-ack (server -> sender) or delivery-ack (recipient -> server).
    pub const ACK: &str = "ack";
    /// Server -> client welcome.
    pub const CONNECTED: &str = "connected";
    /// Server -> client handshake failure.
    pub const ERROR: &str = "error";
    /// Server -> recipient message delivery.
    pub const NEW_MESSAGE: &str = "new_message";
}

/// Error reasons carried in `error` envelopes.
pub mod reasons {
    /// The bearer credential was missing or rejected.
    pub const UNAUTHORIZED: &str = "unauthorized";
    /// The token was valid but the account no longer exists.
    pub const USER_NOT_FOUND: &str = "user_not_found";
}

/// Raw envelope as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name.
    pub event: String,
    /// Target user for directed events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// A private message as sent by a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    /// Recipient.
    pub target: UserId,
    /// Message text (or media reference for non-text kinds).
    pub message: String,
    /// Message kind (`text`, `image`, `video`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Client-supplied timestamp; echoed in acks.
    pub time: i64,
}

#[derive(Deserialize)]
struct PrivateMessageBody {
    message: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    time: i64,
}

fn default_kind() -> String {
    "text".to_string()
}

/// Delivery acknowledgment sent by a recipient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ack {
    /// Timestamp of the acknowledged message.
    pub time: i64,
    /// Delivery ID from the `new_message` frame, when the client echoes it.
    pub delivery_id: Option<DeliveryId>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AckBody {
    Time(i64),
    Detailed {
        time: i64,
        #[serde(default)]
        delivery_id: Option<DeliveryId>,
    },
}

impl From<AckBody> for Ack {
    fn from(body: AckBody) -> Self {
        match body {
            AckBody::Time(time) => Self {
                time,
                delivery_id: None,
            },
            AckBody::Detailed { time, delivery_id } => Self { time, delivery_id },
        }
    }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    /// Client liveness probe.
    Ping,
    /// Client reply to a server probe.
    Pong,
    /// Private message to another user.
    PrivateMessage(PrivateMessage),
    /// Delivery acknowledgment.
    Ack(Ack),
    /// Any event name this server does not handle.
    Unknown(String),
}

impl InboundEvent {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_envelope(envelope)
    }

    /// Decode an already-parsed envelope.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        match envelope.event.as_str() {
            events::PING => Ok(Self::Ping),
            events::PONG => Ok(Self::Pong),
            events::PRIVATE_MESSAGE => {
                let target = envelope
                    .target_user_id
                    .ok_or(ProtocolError::MissingTarget)?;
                let data = envelope.data.ok_or(ProtocolError::MissingData {
                    event: events::PRIVATE_MESSAGE,
                })?;
                let body: PrivateMessageBody =
                    serde_json::from_value(data).map_err(|source| {
                        ProtocolError::InvalidPayload {
                            event: events::PRIVATE_MESSAGE,
                            source,
                        }
                    })?;
                Ok(Self::PrivateMessage(PrivateMessage {
                    target,
                    message: body.message,
                    kind: body.kind,
                    time: body.time,
                }))
            }
            events::ACK => {
                let data = envelope.data.ok_or(ProtocolError::MissingData {
                    event: events::ACK,
                })?;
                let body: AckBody = serde_json::from_value(data).map_err(|source| {
                    ProtocolError::InvalidPayload {
                        event: events::ACK,
                        source,
                    }
                })?;
                Ok(Self::Ack(body.into()))
            }
            other => Ok(Self::Unknown(other.to_owned())),
        }
    }

    /// Event name, for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Ping => events::PING,
            Self::Pong => events::PONG,
            Self::PrivateMessage(_) => events::PRIVATE_MESSAGE,
            Self::Ack(_) => events::ACK,
            Self::Unknown(name) => name,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Payload of an `error` envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable reason (see [`reasons`]).
    pub reason: String,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorPayload {
    /// Build an error payload.
    pub fn new(reason: &str, message: impl Into<String>) -> Self {
        Self {
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

/// A message delivered to its recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Sender user ID.
    pub sender: UserId,
    /// Sender display name.
    #[serde(default)]
    pub sender_username: String,
    /// Message text or media reference.
    pub message: String,
    /// Message kind.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Original client timestamp; the recipient acks with this.
    pub time: i64,
    /// Present on live deliveries that are awaiting an ack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<DeliveryId>,
}

impl NewMessage {
    /// Build the recipient-facing frame for a message from `sender`.
    pub fn from_private(sender: &UserIdentity, message: &PrivateMessage) -> Self {
        Self {
            sender: sender.id,
            sender_username: sender.username.clone(),
            message: message.message.clone(),
            kind: message.kind.clone(),
            time: message.time,
            delivery_id: None,
        }
    }

    /// Attach the tracker-assigned delivery ID.
    #[must_use]
    pub fn with_delivery_id(mut self, id: DeliveryId) -> Self {
        self.delivery_id = Some(id);
        self
    }
}

/// Send-acknowledgment returned to the sender of a private message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    /// Timestamp of the accepted message.
    pub time: i64,
}

/// A server -> client frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Welcome frame carrying the authenticated identity.
    Connected(UserIdentity),
    /// Handshake failure, immediately followed by close.
    Error(ErrorPayload),
    /// Reply to a client `ping`.
    Pong,
    /// Heartbeat probe.
    Ping,
    /// Message delivery.
    NewMessage(NewMessage),
    /// Send-acknowledgment.
    Ack(SendAck),
}

impl OutboundEvent {
    /// Serialize to the wire representation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Event name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => events::CONNECTED,
            Self::Error(_) => events::ERROR,
            Self::Pong => events::PONG,
            Self::Ping => events::PING,
            Self::NewMessage(_) => events::NEW_MESSAGE,
            Self::Ack(_) => events::ACK,
        }
    }
}
