//! HS256 JWT validation for bearer tokens issued by the marketplace.

use async_trait::async_trait;
use bazaar_core::{Role, UserId, UserIdentity};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TokenValidator;
use crate::errors::ServiceError;

/// Claims carried by a marketplace access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID, as a decimal string.
    pub sub: String,
    /// Display name.
    pub username: String,
    /// Account role.
    #[serde(default)]
    pub role: Role,
    /// Avatar reference at issue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Expiry (seconds since epoch).
    pub exp: i64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl TryFrom<Claims> for UserIdentity {
    type Error = ServiceError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let id: i64 = claims
            .sub
            .parse()
            .map_err(|_| ServiceError::InvalidToken(format!("non-numeric sub: {}", claims.sub)))?;
        Ok(UserIdentity::new(UserId::new(id), claims.username, claims.role)
            .with_avatar(claims.avatar))
    }
}

/// Validates HS256 tokens against a shared secret.
pub struct JwtTokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtTokenValidator")
            .field("validation", &self.validation)
            .finish_non_exhaustive()
    }
}

impl JwtTokenValidator {
    /// Build a validator; `issuer`, when set, must match the `iss` claim.
    pub fn new(secret: &str, issuer: Option<&str>) -> Result<Self, ServiceError> {
        if secret.trim().is_empty() {
            return Err(ServiceError::Unavailable("jwt secret not configured".into()));
        }
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Decode and verify `token` synchronously.
    pub fn decode_identity(&self, token: &str) -> Result<UserIdentity, ServiceError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            ServiceError::InvalidToken(e.to_string())
        })?;
        UserIdentity::try_from(data.claims)
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> Result<UserIdentity, ServiceError> {
        self.decode_identity(token)
    }
}
