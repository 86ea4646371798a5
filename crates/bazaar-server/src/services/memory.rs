//! In-memory marketplace for standalone mode and tests.
//!
//! Serves every collaborator contract from one lock-protected state and
//! records the calls it receives so tests can assert on them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bazaar_core::{NewMessage, PrivateMessage, UserId, UserIdentity};
use parking_lot::Mutex;

use super::{MessageStore, PresenceService, PushNotifier, TokenValidator, UserDirectory};
use crate::errors::ServiceError;

/// A message recorded by [`MessageStore::persist`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedMessage {
    /// Sender.
    pub sender: UserId,
    /// Whether the recipient was online when it was routed.
    pub delivered: bool,
    /// The message as sent.
    pub message: PrivateMessage,
}

/// A push notification recorded by [`PushNotifier::send_push`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushRecord {
    /// Sender.
    pub sender: UserId,
    /// Recipient.
    pub receiver: UserId,
    /// Message time.
    pub time: i64,
}

#[derive(Default)]
struct State {
    users: HashMap<UserId, UserIdentity>,
    tokens: HashMap<String, UserIdentity>,
    presence: HashMap<UserId, bool>,
    presence_log: Vec<(UserId, bool)>,
    backlog: HashMap<UserId, Vec<NewMessage>>,
    persisted: Vec<PersistedMessage>,
    pushes: Vec<PushRecord>,
}

/// Marketplace backed by process memory.
#[derive(Default)]
pub struct InMemoryMarketplace {
    state: Mutex<State>,
    fail_persist: AtomicBool,
    fail_avatar: AtomicBool,
    fail_presence: AtomicBool,
}

impl InMemoryMarketplace {
    /// Empty marketplace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user and a bearer token that authenticates as them.
    ///
    /// The token carries the identity as issued, without the avatar, the
    /// way a signed token carries its claims.
    pub fn add_user_with_token(&self, identity: UserIdentity, token: impl Into<String>) {
        let mut state = self.state.lock();
        let claims = identity.clone().with_avatar(None);
        let _ = state.tokens.insert(token.into(), claims);
        let _ = state.users.insert(identity.id, identity);
    }

    /// Delete a user account; tokens issued to it keep validating.
    pub fn remove_user(&self, id: UserId) {
        let _ = self.state.lock().users.remove(&id);
    }

    /// Queue a message for delivery at `id`'s next connect.
    pub fn queue_undelivered(&self, id: UserId, message: NewMessage) {
        self.state.lock().backlog.entry(id).or_default().push(message);
    }

    /// Last published presence for `id`.
    pub fn presence_of(&self, id: UserId) -> Option<bool> {
        self.state.lock().presence.get(&id).copied()
    }

    /// Every presence publication, in order.
    pub fn presence_log(&self) -> Vec<(UserId, bool)> {
        self.state.lock().presence_log.clone()
    }

    /// Every persisted message, in order.
    pub fn persisted(&self) -> Vec<PersistedMessage> {
        self.state.lock().persisted.clone()
    }

    /// Every push notification, in order.
    pub fn pushes(&self) -> Vec<PushRecord> {
        self.state.lock().pushes.clone()
    }

    /// Make `persist` fail.
    pub fn set_persist_failing(&self, failing: bool) {
        self.fail_persist.store(failing, Ordering::Relaxed);
    }

    /// Make `avatar` fail.
    pub fn set_avatar_failing(&self, failing: bool) {
        self.fail_avatar.store(failing, Ordering::Relaxed);
    }

    /// Make `set_presence` fail.
    pub fn set_presence_failing(&self, failing: bool) {
        self.fail_presence.store(failing, Ordering::Relaxed);
    }
}

#[async_trait]
impl TokenValidator for InMemoryMarketplace {
    async fn validate(&self, token: &str) -> Result<UserIdentity, ServiceError> {
        self.state
            .lock()
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| ServiceError::InvalidToken("unknown token".into()))
    }
}

#[async_trait]
impl UserDirectory for InMemoryMarketplace {
    async fn user_exists(&self, id: UserId) -> Result<bool, ServiceError> {
        Ok(self.state.lock().users.contains_key(&id))
    }

    async fn avatar(&self, id: UserId) -> Result<Option<String>, ServiceError> {
        if self.fail_avatar.load(Ordering::Relaxed) {
            return Err(ServiceError::Unavailable("avatar lookup disabled".into()));
        }
        Ok(self
            .state
            .lock()
            .users
            .get(&id)
            .and_then(|u| u.avatar.clone()))
    }
}

#[async_trait]
impl PresenceService for InMemoryMarketplace {
    async fn set_presence(&self, id: UserId, online: bool) -> Result<(), ServiceError> {
        if self.fail_presence.load(Ordering::Relaxed) {
            return Err(ServiceError::Unavailable("presence disabled".into()));
        }
        let mut state = self.state.lock();
        let _ = state.presence.insert(id, online);
        state.presence_log.push((id, online));
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryMarketplace {
    async fn fetch_undelivered(&self, id: UserId) -> Result<Vec<NewMessage>, ServiceError> {
        Ok(self.state.lock().backlog.remove(&id).unwrap_or_default())
    }

    async fn persist(
        &self,
        sender: &UserIdentity,
        delivered: bool,
        message: &PrivateMessage,
    ) -> Result<(), ServiceError> {
        if self.fail_persist.load(Ordering::Relaxed) {
            return Err(ServiceError::Unavailable("store disabled".into()));
        }
        let mut state = self.state.lock();
        state.persisted.push(PersistedMessage {
            sender: sender.id,
            delivered,
            message: message.clone(),
        });
        if !delivered {
            state
                .backlog
                .entry(message.target)
                .or_default()
                .push(NewMessage::from_private(sender, message));
        }
        Ok(())
    }
}

#[async_trait]
impl PushNotifier for InMemoryMarketplace {
    async fn send_push(
        &self,
        sender: &UserIdentity,
        message: &PrivateMessage,
    ) -> Result<(), ServiceError> {
        self.state.lock().pushes.push(PushRecord {
            sender: sender.id,
            receiver: message.target,
            time: message.time,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bazaar_core::Role;

    fn alice() -> UserIdentity {
        UserIdentity::new(UserId::new(1), "alice", Role::User)
            .with_avatar(Some("a.png".into()))
    }

    fn msg_to(target: i64, time: i64) -> PrivateMessage {
        PrivateMessage {
            target: UserId::new(target),
            message: "hello".into(),
            kind: "text".into(),
            time,
        }
    }

    #[tokio::test]
    async fn token_resolves_without_avatar() {
        let m = InMemoryMarketplace::new();
        m.add_user_with_token(alice(), "tok-a");
        let identity = m.validate("tok-a").await.unwrap();
        assert_eq!(identity.id, UserId::new(1));
        assert!(identity.avatar.is_none());
        assert_eq!(m.avatar(UserId::new(1)).await.unwrap().as_deref(), Some("a.png"));
    }

    #[tokio::test]
    async fn unknown_token_rejected() {
        let m = InMemoryMarketplace::new();
        assert_matches!(m.validate("nope").await, Err(ServiceError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn removed_user_token_still_validates() {
        let m = InMemoryMarketplace::new();
        m.add_user_with_token(alice(), "tok-a");
        m.remove_user(UserId::new(1));
        assert_eq!(m.validate("tok-a").await.unwrap().id, UserId::new(1));
        assert!(!m.user_exists(UserId::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn undelivered_persist_feeds_backlog_once() {
        let m = InMemoryMarketplace::new();
        m.persist(&alice(), false, &msg_to(2, 10)).await.unwrap();
        m.persist(&alice(), true, &msg_to(2, 11)).await.unwrap();

        let backlog = m.fetch_undelivered(UserId::new(2)).await.unwrap();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].time, 10);
        assert_eq!(backlog[0].sender_username, "alice");
        assert!(m.fetch_undelivered(UserId::new(2)).await.unwrap().is_empty());
        assert_eq!(m.persisted().len(), 2);
    }

    #[tokio::test]
    async fn presence_recorded_in_order() {
        let m = InMemoryMarketplace::new();
        m.set_presence(UserId::new(1), true).await.unwrap();
        m.set_presence(UserId::new(1), false).await.unwrap();
        assert_eq!(m.presence_of(UserId::new(1)), Some(false));
        assert_eq!(
            m.presence_log(),
            vec![(UserId::new(1), true), (UserId::new(1), false)]
        );
    }

    #[tokio::test]
    async fn failure_toggles() {
        let m = InMemoryMarketplace::new();
        m.set_persist_failing(true);
        m.set_avatar_failing(true);
        m.set_presence_failing(true);
        assert!(m.persist(&alice(), true, &msg_to(2, 1)).await.is_err());
        assert!(m.avatar(UserId::new(1)).await.is_err());
        assert!(m.set_presence(UserId::new(1), true).await.is_err());
        assert!(m.persisted().is_empty());
    }

    #[tokio::test]
    async fn push_recorded() {
        let m = InMemoryMarketplace::new();
        m.send_push(&alice(), &msg_to(2, 99)).await.unwrap();
        assert_eq!(
            m.pushes(),
            vec![PushRecord {
                sender: UserId::new(1),
                receiver: UserId::new(2),
                time: 99
            }]
        );
    }
}
