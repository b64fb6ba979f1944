use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::AuthError;

/// Cached token entry, as persisted by a [`TokenStore`](super::TokenStore).
///
/// # Example
/// ```no_run
/// use oauthcli::auth::Token;
/// use chrono::{DateTime, Utc};
///
/// let token = Token {
///     access_token: "access".to_string(),
///     refresh_token: Some("refresh".to_string()),
///     id_token: None,
///     expires_at: None,
///     last_refresh: Some(DateTime::<Utc>::from(std::time::SystemTime::now())),
///     scopes: Some(vec!["User.Read".to_string()]),
///     account_id: None,
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub scopes: Option<Vec<String>>,
    pub account_id: Option<String>,
}

impl Token {
    /// True when the token is unusable within `grace` from now.
    /// Tokens without an expiry never go stale.
    pub fn is_stale(&self, grace: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => match expires_at.checked_sub_signed(grace) {
                Some(refresh_at) => Utc::now() >= refresh_at,
                None => true,
            },
            None => false,
        }
    }
}

/// Successful token-endpoint response.
///
/// `raw` keeps the provider payload as received (key order included) so it
/// can be rendered verbatim.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<serde_json::Value>,
    scope: Option<String>,
}

impl TokenResponse {
    pub fn from_slice(body: &[u8]) -> Result<Self, AuthError> {
        let raw: serde_json::Value = serde_json::from_slice(body)?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: serde_json::Value) -> Result<Self, AuthError> {
        let payload: TokenPayload = serde_json::from_value(raw.clone())?;
        let access_token = payload.access_token.ok_or_else(|| {
            AuthError::InvalidResponse("Token response missing access_token".to_string())
        })?;
        Ok(Self {
            access_token,
            refresh_token: payload.refresh_token,
            id_token: payload.id_token,
            // The v1 endpoints send expires_in as a string.
            expires_in: payload.expires_in.as_ref().and_then(|value| {
                value
                    .as_i64()
                    .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            }),
            scope: payload.scope,
            raw,
        })
    }

    pub fn to_token(&self) -> Token {
        let now = Utc::now();
        Token {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            id_token: self.id_token.clone(),
            // Lifetimes chrono cannot represent are treated as no expiry.
            expires_at: self
                .expires_in
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| now.checked_add_signed(lifetime)),
            last_refresh: Some(now),
            scopes: self
                .scope
                .as_ref()
                .map(|s| s.split_whitespace().map(str::to_string).collect()),
            account_id: None,
        }
    }
}
