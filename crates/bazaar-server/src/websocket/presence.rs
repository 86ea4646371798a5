//! Presence publication, serialized per user.
//!
//! Every publish reads the registry under a per-user async lock and sends
//! only a change, so concurrent connects and teardowns of one user's
//! devices publish the final state exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use bazaar_core::UserId;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::registry::ConnectionRegistry;
use crate::services::PresenceService;

/// A user with no slot was last published offline (or never published).
type Slot = Arc<tokio::sync::Mutex<bool>>;

/// Publishes each user's online state as derived from the registry.
pub struct PresencePublisher {
    registry: Arc<ConnectionRegistry>,
    service: Arc<dyn PresenceService>,
    published: Mutex<HashMap<UserId, Slot>>,
}

impl PresencePublisher {
    /// Publisher over `registry`, reporting to `service`.
    pub fn new(registry: Arc<ConnectionRegistry>, service: Arc<dyn PresenceService>) -> Self {
        Self {
            registry,
            service,
            published: Mutex::new(HashMap::new()),
        }
    }

    /// Bring the published state of `user_id` in line with the registry.
    ///
    /// Returns the state sent, or `None` when nothing changed or the
    /// publish failed.
    pub async fn sync(&self, user_id: UserId) -> Option<bool> {
        let slot = self.published.lock().entry(user_id).or_default().clone();
        let sent = {
            let mut published = slot.lock().await;
            let online = self.registry.is_online(user_id);
            if *published == online {
                debug!(%user_id, online, "presence unchanged");
                None
            } else {
                match self.service.set_presence(user_id, online).await {
                    Ok(()) => {
                        *published = online;
                        Some(online)
                    }
                    Err(e) => {
                        warn!(%user_id, online, error = %e, "failed to publish presence");
                        None
                    }
                }
            }
        };
        self.release(user_id, &slot);
        sent
    }

    /// Users holding a slot (published online, or with a publish in flight).
    pub fn tracked_users(&self) -> usize {
        self.published.lock().len()
    }

    fn release(&self, user_id: UserId, slot: &Slot) {
        let mut published = self.published.lock();
        // Only the map and this caller hold it, so no publish is waiting.
        if Arc::strong_count(slot) == 2 && slot.try_lock().is_ok_and(|online| !*online) {
            let _ = published.remove(&user_id);
        }
    }
}
