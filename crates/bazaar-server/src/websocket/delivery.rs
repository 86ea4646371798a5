//! At-least-once delivery of private messages to online recipients.
//!
//! Every message fanned out to an online recipient becomes a pending
//! delivery with its own retry task:
//!
//! ```text
//! CREATED(1) -> RETRYING(2) -> RETRYING(3) -> GIVEN_UP (push + disconnect)
//!      \______________\______________\______> ACKED
//! ```
//!
//! Acked and given-up are mutually exclusive: whichever removes the entry
//! from the pending map first decides.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bazaar_core::{Ack, DeliveryId, NewMessage, OutboundEvent, PrivateMessage, UserId, UserIdentity};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::ConnectionRegistry;
use crate::config::DeliveryConfig;
use crate::metrics::{
    DELIVERIES_PENDING, DELIVERY_ACKS_TOTAL, DELIVERY_GIVE_UPS_TOTAL, DELIVERY_RETRIES_TOTAL,
    PUSH_FAILURES_TOTAL,
};
use crate::services::PushNotifier;

/// Identifies one pending delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    /// Recipient.
    pub receiver: UserId,
    /// Tracker-assigned sequence number.
    pub delivery_id: DeliveryId,
}

/// A message awaiting its recipient's ack.
#[derive(Clone, Debug)]
pub struct PendingDelivery {
    /// Sends so far, the first one included.
    pub attempt: u32,
    /// Who sent it.
    pub sender: UserIdentity,
    /// The message as sent.
    pub message: PrivateMessage,
    /// The exact frame re-sent on every attempt.
    pub frame: NewMessage,
}

/// How a retry task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The recipient acknowledged.
    Acked,
    /// Attempts exhausted; push sent and recipient disconnected.
    GivenUp,
    /// The tracker was shut down.
    Cancelled,
}

enum Step {
    Acked,
    Resend(NewMessage),
    GiveUp(PendingDelivery),
}

/// Pending-delivery map plus the retry machinery.
pub struct DeliveryTracker {
    pending: Mutex<HashMap<DeliveryKey, PendingDelivery>>,
    next_id: AtomicU64,
    registry: Arc<ConnectionRegistry>,
    push: Arc<dyn PushNotifier>,
    config: DeliveryConfig,
    cancel: CancellationToken,
}

impl DeliveryTracker {
    /// Create a tracker. Retry tasks stop when `cancel` fires.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        push: Arc<dyn PushNotifier>,
        config: DeliveryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            registry,
            push,
            config,
            cancel,
        }
    }

    /// Send `message` to every connection of its target and start retrying.
    ///
    /// The caller checks that the target is online.
    pub fn track(self: &Arc<Self>, sender: &UserIdentity, message: PrivateMessage) -> DeliveryKey {
        let key = DeliveryKey {
            receiver: message.target,
            delivery_id: DeliveryId::new(self.next_id.fetch_add(1, Ordering::Relaxed)),
        };
        let frame = NewMessage::from_private(sender, &message).with_delivery_id(key.delivery_id);

        // Insert before fan-out so an immediate ack finds the entry.
        let _ = self.pending.lock().insert(
            key,
            PendingDelivery {
                attempt: 1,
                sender: sender.clone(),
                message,
                frame: frame.clone(),
            },
        );
        self.update_gauge();

        let sent = self
            .registry
            .send_to_user(key.receiver, &OutboundEvent::NewMessage(frame));
        debug!(
            receiver = %key.receiver,
            delivery_id = %key.delivery_id,
            connections = sent,
            "delivery started"
        );

        let tracker = Arc::clone(self);
        let _ = tokio::spawn(async move {
            let outcome = tracker.retry_loop(key).await;
            debug!(receiver = %key.receiver, delivery_id = %key.delivery_id, ?outcome, "delivery finished");
        });
        key
    }

    /// Apply an ack from `receiver`.
    ///
    /// With a delivery ID, removes exactly that entry. Without one, removes
    /// every entry of `receiver` whose message time equals `ack.time`.
    /// Returns the number of entries removed.
    pub fn acknowledge(&self, receiver: UserId, ack: &Ack) -> usize {
        let removed = {
            let mut pending = self.pending.lock();
            match ack.delivery_id {
                Some(delivery_id) => usize::from(
                    pending
                        .remove(&DeliveryKey {
                            receiver,
                            delivery_id,
                        })
                        .is_some(),
                ),
                None => {
                    let before = pending.len();
                    pending.retain(|key, entry| {
                        key.receiver != receiver || entry.message.time != ack.time
                    });
                    before - pending.len()
                }
            }
        };
        if removed > 0 {
            counter!(DELIVERY_ACKS_TOTAL).increment(removed as u64);
            self.update_gauge();
            debug!(%receiver, time = ack.time, delivery_id = ?ack.delivery_id, removed, "delivery acked");
        }
        removed
    }

    /// Deliveries awaiting an ack.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Attempts made so far for `key`, if still pending.
    pub fn attempt_of(&self, key: DeliveryKey) -> Option<u32> {
        self.pending.lock().get(&key).map(|p| p.attempt)
    }

    /// Whether `key` is still pending.
    pub fn is_pending(&self, key: DeliveryKey) -> bool {
        self.pending.lock().contains_key(&key)
    }

    async fn retry_loop(&self, key: DeliveryKey) -> RetryOutcome {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return RetryOutcome::Cancelled,
                () = time::sleep(self.config.retry_interval) => {}
            }

            match self.step(key) {
                Step::Acked => return RetryOutcome::Acked,
                Step::Resend(frame) => {
                    counter!(DELIVERY_RETRIES_TOTAL).increment(1);
                    let sent = self
                        .registry
                        .send_to_user(key.receiver, &OutboundEvent::NewMessage(frame));
                    debug!(receiver = %key.receiver, delivery_id = %key.delivery_id, connections = sent, "delivery retried");
                }
                Step::GiveUp(entry) => {
                    self.give_up(key, &entry).await;
                    return RetryOutcome::GivenUp;
                }
            }
        }
    }

    fn step(&self, key: DeliveryKey) -> Step {
        let step = {
            let mut pending = self.pending.lock();
            let Some(entry) = pending.get_mut(&key) else {
                return Step::Acked;
            };
            if entry.attempt < self.config.max_attempts {
                entry.attempt += 1;
                Step::Resend(entry.frame.clone())
            } else {
                match pending.remove(&key) {
                    Some(entry) => Step::GiveUp(entry),
                    None => Step::Acked,
                }
            }
        };
        if matches!(step, Step::GiveUp(_)) {
            self.update_gauge();
        }
        step
    }

    async fn give_up(&self, key: DeliveryKey, entry: &PendingDelivery) {
        counter!(DELIVERY_GIVE_UPS_TOTAL).increment(1);
        info!(
            receiver = %key.receiver,
            delivery_id = %key.delivery_id,
            sender = %entry.sender.id,
            attempts = entry.attempt,
            "delivery exhausted, falling back to push"
        );
        if let Err(e) = self.push.send_push(&entry.sender, &entry.message).await {
            counter!(PUSH_FAILURES_TOTAL).increment(1);
            warn!(receiver = %key.receiver, error = %e, "push notification failed");
        }
        let closed = self.registry.disconnect_user(key.receiver);
        debug!(receiver = %key.receiver, closed, "recipient disconnected after give-up");
    }

    fn update_gauge(&self) {
        #[allow(clippy::cast_precision_loss)]
        gauge!(DELIVERIES_PENDING).set(self.pending_count() as f64);
    }
}
