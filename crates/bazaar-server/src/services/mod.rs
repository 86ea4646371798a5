//! Collaborator contracts for the marketplace backend.
//!
//! The realtime layer never touches the database or token issuer directly.
//! It calls these traits, injected as `Arc<dyn _>`:
//!
//! - [`TokenValidator`]: bearer credential to [`UserIdentity`]
//! - [`UserDirectory`]: existence check and avatar lookup
//! - [`PresenceService`]: online/offline publication
//! - [`MessageStore`]: persistence and offline backlog
//! - [`PushNotifier`]: fallback when live delivery is exhausted
//!
//! Adapters: [`jwt::JwtTokenValidator`], [`http::MarketplaceClient`],
//! [`memory::InMemoryMarketplace`].

pub mod http;
pub mod jwt;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bazaar_core::{NewMessage, PrivateMessage, UserId, UserIdentity};

use crate::errors::ServiceError;

use self::http::MarketplaceClient;
use self::jwt::JwtTokenValidator;
use self::memory::InMemoryMarketplace;

// ─────────────────────────────────────────────────────────────────────────────
// Contracts
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves a bearer credential to an identity.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token`; any failure rejects the handshake.
    async fn validate(&self, token: &str) -> Result<UserIdentity, ServiceError>;
}

/// Read access to user accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Whether the account still exists.
    async fn user_exists(&self, id: UserId) -> Result<bool, ServiceError>;

    /// Current avatar reference, if any.
    async fn avatar(&self, id: UserId) -> Result<Option<String>, ServiceError>;
}

/// Publishes a user's online state. Implementations must be idempotent.
#[async_trait]
pub trait PresenceService: Send + Sync {
    /// Record `id` as online or offline.
    async fn set_presence(&self, id: UserId, online: bool) -> Result<(), ServiceError>;
}

/// Durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages that arrived while `id` had no live connection.
    async fn fetch_undelivered(&self, id: UserId) -> Result<Vec<NewMessage>, ServiceError>;

    /// Store a routed message; `delivered` is whether the recipient was online.
    async fn persist(
        &self,
        sender: &UserIdentity,
        delivered: bool,
        message: &PrivateMessage,
    ) -> Result<(), ServiceError>;
}

/// Out-of-band notification for messages that could not be delivered live.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    /// Notify `message.target` about a message from `sender`.
    async fn send_push(
        &self,
        sender: &UserIdentity,
        message: &PrivateMessage,
    ) -> Result<(), ServiceError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Bundle
// ─────────────────────────────────────────────────────────────────────────────

/// The full set of collaborators a server needs.
#[derive(Clone)]
pub struct Collaborators {
    /// Token validation.
    pub tokens: Arc<dyn TokenValidator>,
    /// User lookups.
    pub users: Arc<dyn UserDirectory>,
    /// Presence publication.
    pub presence: Arc<dyn PresenceService>,
    /// Message persistence.
    pub messages: Arc<dyn MessageStore>,
    /// Push fallback.
    pub push: Arc<dyn PushNotifier>,
}

impl Collaborators {
    /// Production wiring: JWT validation plus the marketplace REST API.
    pub fn remote(tokens: JwtTokenValidator, client: MarketplaceClient) -> Self {
        let client = Arc::new(client);
        Self {
            tokens: Arc::new(tokens),
            users: client.clone(),
            presence: client.clone(),
            messages: client.clone(),
            push: client,
        }
    }

    /// Every contract served by one in-memory marketplace.
    pub fn in_memory(marketplace: Arc<InMemoryMarketplace>) -> Self {
        Self {
            tokens: marketplace.clone(),
            users: marketplace.clone(),
            presence: marketplace.clone(),
            messages: marketplace.clone(),
            push: marketplace,
        }
    }
}
