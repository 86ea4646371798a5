//! Marketplace backend client over its internal REST API.

use std::time::Duration;

use async_trait::async_trait;
use bazaar_core::{NewMessage, PrivateMessage, UserId, UserIdentity};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MessageStore, PresenceService, PushNotifier, UserDirectory};
use crate::errors::ServiceError;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Deserialize)]
struct AvatarResponse {
    #[serde(default)]
    avatar: Option<String>,
}

#[derive(Serialize)]
struct PresenceRequest {
    online: bool,
}

/// Body of `POST /internal/messages`.
#[derive(Debug, Serialize)]
pub struct PersistRequest<'a> {
    /// Sender user ID.
    pub sender_id: UserId,
    /// Recipient user ID.
    pub receiver_id: UserId,
    /// Whether the recipient was online when routed.
    pub delivered: bool,
    /// Message text.
    pub message: &'a str,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: &'a str,
    /// Client timestamp.
    pub time: i64,
}

/// Body of `POST /internal/push`.
#[derive(Debug, Serialize)]
pub struct PushRequest<'a> {
    /// Sender user ID.
    pub sender_id: UserId,
    /// Sender display name, shown in the notification.
    pub sender_username: &'a str,
    /// Recipient user ID.
    pub receiver_id: UserId,
    /// Message text.
    pub message: &'a str,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: &'a str,
    /// Client timestamp.
    pub time: i64,
}

/// `reqwest` client for the marketplace's internal endpoints.
pub struct MarketplaceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl MarketplaceClient {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bazaar-server/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Base URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn send(
        &self,
        method: Method,
        path: String,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<reqwest::Response, ServiceError> {
        let method_name = method_str(&method);
        let response = build(self.request(method, &path)).send().await?;
        let status = response.status();
        debug!(method = method_name, path = %path, status = status.as_u16(), "marketplace request");
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(response)
        } else {
            Err(ServiceError::Status {
                method: method_name,
                path,
                status: status.as_u16(),
            })
        }
    }
}

fn method_str(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::PUT => "PUT",
        Method::POST => "POST",
        Method::DELETE => "DELETE",
        _ => "OTHER",
    }
}

fn not_found(method: &'static str, path: String) -> ServiceError {
    ServiceError::Status {
        method,
        path,
        status: StatusCode::NOT_FOUND.as_u16(),
    }
}

#[async_trait]
impl UserDirectory for MarketplaceClient {
    async fn user_exists(&self, id: UserId) -> Result<bool, ServiceError> {
        let response = self
            .send(Method::GET, format!("/internal/users/{id}"), |b| b)
            .await?;
        Ok(response.status() != StatusCode::NOT_FOUND)
    }

    async fn avatar(&self, id: UserId) -> Result<Option<String>, ServiceError> {
        let path = format!("/internal/users/{id}/avatar");
        let response = self.send(Method::GET, path.clone(), |b| b).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_found("GET", path));
        }
        let body: AvatarResponse = response.json().await?;
        Ok(body.avatar)
    }
}

#[async_trait]
impl PresenceService for MarketplaceClient {
    async fn set_presence(&self, id: UserId, online: bool) -> Result<(), ServiceError> {
        let path = format!("/internal/users/{id}/presence");
        let response = self
            .send(Method::PUT, path.clone(), |b| b.json(&PresenceRequest { online }))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_found("PUT", path));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MarketplaceClient {
    async fn fetch_undelivered(&self, id: UserId) -> Result<Vec<NewMessage>, ServiceError> {
        let path = format!("/internal/users/{id}/messages/undelivered");
        let response = self.send(Method::GET, path, |b| b).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Ok(response.json().await?)
    }

    async fn persist(
        &self,
        sender: &UserIdentity,
        delivered: bool,
        message: &PrivateMessage,
    ) -> Result<(), ServiceError> {
        let body = PersistRequest {
            sender_id: sender.id,
            receiver_id: message.target,
            delivered,
            message: &message.message,
            kind: &message.kind,
            time: message.time,
        };
        let path = "/internal/messages".to_string();
        let response = self.send(Method::POST, path.clone(), |b| b.json(&body)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_found("POST", path));
        }
        Ok(())
    }
}

#[async_trait]
impl PushNotifier for MarketplaceClient {
    async fn send_push(
        &self,
        sender: &UserIdentity,
        message: &PrivateMessage,
    ) -> Result<(), ServiceError> {
        let body = PushRequest {
            sender_id: sender.id,
            sender_username: &sender.username,
            receiver_id: message.target,
            message: &message.message,
            kind: &message.kind,
            time: message.time,
        };
        let path = "/internal/push".to_string();
        let response = self.send(Method::POST, path.clone(), |b| b.json(&body)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_found("POST", path));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_core::Role;

    fn client(base: &str) -> MarketplaceClient {
        MarketplaceClient::new(base, Some("k".into()), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn trailing_slash_trimmed() {
        assert_eq!(client("http://api.local/").base_url(), "http://api.local");
    }

    #[test]
    fn persist_body_shape() {
        let sender = UserIdentity::new(UserId::new(1), "alice", Role::User);
        let msg = PrivateMessage {
            target: UserId::new(2),
            message: "hi".into(),
            kind: "text".into(),
            time: 1000,
        };
        let body = PersistRequest {
            sender_id: sender.id,
            receiver_id: msg.target,
            delivered: true,
            message: &msg.message,
            kind: &msg.kind,
            time: msg.time,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "sender_id": 1, "receiver_id": 2, "delivered": true,
                "message": "hi", "type": "text", "time": 1000
            })
        );
    }

    #[test]
    fn push_body_carries_sender_username() {
        let body = PushRequest {
            sender_id: UserId::new(1),
            sender_username: "alice",
            receiver_id: UserId::new(2),
            message: "hi",
            kind: "image",
            time: 5,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["sender_username"], "alice");
        assert_eq!(value["type"], "image");
    }

    #[tokio::test]
    async fn unreachable_backend_is_http_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let c = client("http://127.0.0.1:9");
        let err = c.user_exists(UserId::new(1)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Http(_)));
    }
}
