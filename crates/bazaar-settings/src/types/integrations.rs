//! Settings for the collaborators the server calls into.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bearer-token validation settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 shared secret used by the marketplace token issuer.
    pub jwt_secret: String,
    /// Expected `iss` claim, if the issuer sets one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// Marketplace backend (users, presence, messages, push).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketplaceSettings {
    /// Base URL of the internal REST API.
    pub base_url: String,
    /// Optional `x-api-key` sent on every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for MarketplaceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_key: None,
            timeout_ms: 5000,
        }
    }
}

impl MarketplaceSettings {
    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
