//! Authenticated user identity bound to a connection.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Marketplace account role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular buyer/seller account.
    #[default]
    User,
    /// Catalog administrator.
    Admin,
}

/// Identity resolved once at connect time from the bearer token.
///
/// Immutable for the connection's life except `avatar`, which is filled in
/// best-effort after the user-existence check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Database ID.
    pub id: UserId,
    /// Display name.
    pub username: String,
    /// Account role.
    #[serde(default)]
    pub role: Role,
    /// Avatar reference (storage key or URL).
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserIdentity {
    /// Build an identity without an avatar.
    pub fn new(id: UserId, username: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            username: username.into(),
            role,
            avatar: None,
        }
    }

    /// Replace the avatar reference.
    #[must_use]
    pub fn with_avatar(mut self, avatar: Option<String>) -> Self {
        self.avatar = avatar;
        self
    }
}
