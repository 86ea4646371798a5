//! Protocol error types.

use thiserror::Error;

/// An inbound frame that could not be decoded into an [`InboundEvent`].
///
/// Any of these terminates the connection's read loop.
///
/// [`InboundEvent`]: crate::protocol::InboundEvent
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not a JSON envelope.
    #[error("malformed envelope: {0}")]
    Envelope(#[from] serde_json::Error),
    /// A known event arrived without its required payload.
    #[error("event `{event}` requires a data payload")]
    MissingData {
        /// Event name.
        event: &'static str,
    },
    /// `private_message` arrived without `target_user_id`.
    #[error("event `private_message` requires target_user_id")]
    MissingTarget,
    /// The payload did not match the event's schema.
    #[error("invalid payload for `{event}`: {source}")]
    InvalidPayload {
        /// Event name.
        event: &'static str,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}
