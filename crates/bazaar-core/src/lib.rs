//! # bazaar-core
//!
//! Shared vocabulary for the Bazaar realtime messaging layer:
//!
//! - **IDs**: `UserId`, `ConnectionId`, `DeliveryId` newtypes
//! - **Identity**: `UserIdentity` resolved from a bearer token at connect time
//! - **Protocol**: `InboundEvent` / `OutboundEvent` sum types over the JSON
//!   envelope `{event, target_user_id?, data?}` with typed payloads
//! - **Errors**: `ProtocolError` for malformed inbound frames

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod ids;
pub mod protocol;

pub use errors::ProtocolError;
pub use identity::{Role, UserIdentity};
pub use ids::{ConnectionId, DeliveryId, UserId};
pub use protocol::{
    Ack, Envelope, ErrorPayload, InboundEvent, NewMessage, OutboundEvent, PrivateMessage,
    SendAck,
};
