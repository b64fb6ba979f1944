use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use super::device_code::{DeviceCodeChallenge, DevicePoller};
use super::error::AuthError;
use super::store::TokenStore;
use super::token::{Token, TokenResponse};

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Scopes requested by every flow.
pub const DEFAULT_SCOPES: &[&str] = &["User.Read"];

// Always requested alongside the caller's scopes so the provider issues
// an id token and a refresh token.
const RESERVED_SCOPES: &[&str] = &["openid", "profile", "offline_access"];
const REFRESH_GRACE_PERIOD_MINUTES: i64 = 5;

/// Redeems authorization codes delivered to a redirect URI.
#[async_trait]
pub trait AuthCodeRedeemer: Send + Sync {
    async fn redeem_auth_code(
        &self,
        code: &str,
        redirect_uri: &str,
        scopes: &[&str],
    ) -> Result<TokenResponse, AuthError>;
}

/// Authorization request handed to the browser by the interactive flow.
#[derive(Debug, Clone)]
pub struct InteractiveSession {
    pub authorize_url: String,
    pub redirect_uri: String,
    pub state: String,
}

/// OAuth2 public client for one Microsoft identity platform tenant.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use oauthcli::auth::{FileTokenStore, IdentityClient, TokenStoreConfig};
///
/// let store = FileTokenStore::new(TokenStoreConfig::new(std::path::PathBuf::from("/tmp")));
/// let client = IdentityClient::new("https://login.microsoftonline.com", "contoso", "client-id")?
///     .with_token_store(Arc::new(store));
/// # Ok::<(), oauthcli::auth::AuthError>(())
/// ```
pub struct IdentityClient {
    client: reqwest::Client,
    authority: Url,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    token_store: Option<Arc<dyn TokenStore>>,
}

impl IdentityClient {
    pub fn new(
        authority_host: &str,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let tenant_id = tenant_id.into();
        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(AuthError::InvalidClient("client id is empty".to_string()));
        }
        if tenant_id.trim().is_empty() {
            return Err(AuthError::InvalidClient("tenant id is empty".to_string()));
        }
        let authority = format!("{}/{}/", authority_host.trim_end_matches('/'), tenant_id);
        let authority = Url::parse(&authority)
            .map_err(|err| AuthError::InvalidClient(format!("authority {authority}: {err}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            authority,
            tenant_id,
            client_id,
            client_secret: String::new(),
            token_store: None,
        })
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = secret.into();
        self
    }

    pub fn with_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn authority(&self) -> &str {
        self.authority.as_str()
    }

    pub fn token_url(&self) -> String {
        self.endpoint("oauth2/v2.0/token")
    }

    pub fn device_code_url(&self) -> String {
        self.endpoint("oauth2/v2.0/devicecode")
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.authority, path)
    }

    fn cache_key(&self) -> String {
        format!("microsoft-{}", self.tenant_id)
    }

    /// Authorize URL for the authorization-code flow.
    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        scopes: &[&str],
        state: Option<&str>,
    ) -> Result<String, AuthError> {
        let scope = scopes.join(" ");
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_mode", "query"),
            ("response_type", "code"),
            ("scope", scope.as_str()),
        ];
        if let Some(state) = state {
            params.push(("state", state));
        }
        let url = Url::parse_with_params(&self.endpoint("oauth2/v2.0/authorize"), &params)
            .map_err(|err| AuthError::InvalidClient(err.to_string()))?;
        Ok(url.to_string())
    }

    /// Start a device-code flow.
    pub async fn start_device_code(
        &self,
        scopes: &[&str],
    ) -> Result<DeviceCodeChallenge, AuthError> {
        let scope = with_reserved_scopes(scopes);
        let resp = self
            .client
            .post(self.device_code_url())
            .header("Accept", "application/json")
            .form(&[("client_id", self.client_id.as_str()), ("scope", scope.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Provider { status, body });
        }
        let payload: DeviceCodeResponse = resp.json().await?;
        tracing::debug!(
            interval = payload.interval,
            expires_in = payload.expires_in,
            "device code issued"
        );
        let expires_at = i64::try_from(payload.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthError::InvalidResponse(format!(
                    "device code expires_in out of range: {}",
                    payload.expires_in
                ))
            })?;
        Ok(DeviceCodeChallenge {
            device_code: payload.device_code,
            user_code: payload.user_code,
            verification_url: payload.verification_uri,
            interval_secs: payload.interval,
            expires_at,
            message: payload.message,
        })
    }

    /// Poller bound to this client's token endpoint and credentials.
    pub fn device_poller(&self) -> DevicePoller {
        DevicePoller::new(self.token_url(), &self.client_id, &self.client_secret)
            .with_client(self.client.clone())
    }

    pub async fn acquire_token_by_auth_code(
        &self,
        code: &str,
        redirect_uri: &str,
        scopes: &[&str],
    ) -> Result<TokenResponse, AuthError> {
        let scope = with_reserved_scopes(scopes);
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
        ])
        .await
    }

    pub async fn acquire_token_by_username_password(
        &self,
        username: &str,
        password: &str,
        scopes: &[&str],
    ) -> Result<TokenResponse, AuthError> {
        let scope = with_reserved_scopes(scopes);
        self.token_request(&[
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("username", username),
            ("password", password),
            ("scope", scope.as_str()),
        ])
        .await
    }

    pub async fn acquire_token_by_refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[&str],
    ) -> Result<TokenResponse, AuthError> {
        let scope = with_reserved_scopes(scopes);
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ])
        .await
    }

    /// Reacquire a token from the cache, refreshing it when it is about to
    /// expire.
    pub async fn acquire_token_silent(&self, scopes: &[&str]) -> Result<Token, AuthError> {
        let store = self.token_store.as_ref().ok_or(AuthError::NotLoggedIn)?;
        let cached = store
            .load(&self.cache_key(), &self.client_id)?
            .ok_or(AuthError::NotLoggedIn)?;
        if !cached.is_stale(Duration::minutes(REFRESH_GRACE_PERIOD_MINUTES)) {
            tracing::debug!("using cached token");
            return Ok(cached);
        }
        let refresh_token = cached
            .refresh_token
            .as_deref()
            .ok_or(AuthError::ExpiredOrInvalidGrant)?;
        tracing::info!("cached token is stale, refreshing");
        let refreshed = self
            .acquire_token_by_refresh_token(refresh_token, scopes)
            .await?;
        let mut token = refreshed.to_token();
        // Refresh responses may omit the refresh token; keep the old one.
        if token.refresh_token.is_none() {
            token.refresh_token = cached.refresh_token.clone();
        }
        store.save(&self.cache_key(), &self.client_id, &token)?;
        Ok(token)
    }

    /// Save a token obtained outside [`token_request`](Self::token_request),
    /// e.g. by the device poller.
    pub fn remember(&self, response: &TokenResponse) -> Result<(), AuthError> {
        if let Some(store) = &self.token_store {
            store.save(&self.cache_key(), &self.client_id, &response.to_token())?;
        }
        Ok(())
    }

    /// Begin an interactive flow; the caller sends the user's browser to
    /// `authorize_url` and captures the redirect.
    pub fn start_interactive(
        &self,
        redirect_uri: &str,
        scopes: &[&str],
    ) -> Result<InteractiveSession, AuthError> {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let authorize_url = self.authorize_url(redirect_uri, scopes, Some(&state))?;
        Ok(InteractiveSession {
            authorize_url,
            redirect_uri: redirect_uri.to_string(),
            state,
        })
    }

    /// Finish an interactive flow from the redirect's query parameters.
    pub async fn finish_interactive(
        &self,
        session: &InteractiveSession,
        params: &HashMap<String, String>,
        scopes: &[&str],
    ) -> Result<TokenResponse, AuthError> {
        if let Some(error) = params.get("error") {
            if error == "access_denied" {
                return Err(AuthError::AccessDenied);
            }
            let description = params
                .get("error_description")
                .map(String::as_str)
                .unwrap_or_default();
            return Err(AuthError::InvalidResponse(format!(
                "Authorization failed: {error} {description}"
            )));
        }
        let returned_state = params.get("state").map(String::as_str).unwrap_or_default();
        if returned_state != session.state {
            return Err(AuthError::InvalidResponse(format!(
                "OAuth state mismatch: expected {}, got {returned_state}",
                session.state
            )));
        }
        let code = params
            .get("code")
            .ok_or_else(|| AuthError::InvalidResponse("Redirect missing code".to_string()))?;
        self.acquire_token_by_auth_code(code, &session.redirect_uri, scopes)
            .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let mut form = form.to_vec();
        // Confidential clients authenticate every token request.
        if !self.client_secret.is_empty() {
            form.push(("client_secret", self.client_secret.as_str()));
        }
        let resp = self
            .client
            .post(self.token_url())
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(token_error(status, &body));
        }
        let token = TokenResponse::from_slice(&body)?;
        self.remember(&token)?;
        Ok(token)
    }
}

#[async_trait]
impl AuthCodeRedeemer for IdentityClient {
    async fn redeem_auth_code(
        &self,
        code: &str,
        redirect_uri: &str,
        scopes: &[&str],
    ) -> Result<TokenResponse, AuthError> {
        self.acquire_token_by_auth_code(code, redirect_uri, scopes)
            .await
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    interval: u64,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorPayload {
    error: Option<String>,
}

fn token_error(status: StatusCode, body: &[u8]) -> AuthError {
    let code = serde_json::from_slice::<TokenErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.error);
    match code.as_deref() {
        Some("invalid_grant") => AuthError::ExpiredOrInvalidGrant,
        Some("access_denied") => AuthError::AccessDenied,
        _ => AuthError::Provider {
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

fn with_reserved_scopes(scopes: &[&str]) -> String {
    let mut all: Vec<&str> = scopes.to_vec();
    for reserved in RESERVED_SCOPES {
        if !all.iter().any(|s| s.eq_ignore_ascii_case(reserved)) {
            all.push(reserved);
        }
    }
    all.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> IdentityClient {
        IdentityClient::new("https://login.example.com/", "contoso", "client-1").unwrap()
    }

    #[test]
    fn endpoints_hang_off_the_tenant_authority() {
        let client = client();
        assert_eq!(client.authority(), "https://login.example.com/contoso/");
        assert_eq!(
            client.token_url(),
            "https://login.example.com/contoso/oauth2/v2.0/token"
        );
        assert_eq!(
            client.device_code_url(),
            "https://login.example.com/contoso/oauth2/v2.0/devicecode"
        );
    }

    #[test]
    fn empty_ids_are_rejected() {
        assert!(matches!(
            IdentityClient::new(DEFAULT_AUTHORITY_HOST, "contoso", " "),
            Err(AuthError::InvalidClient(_))
        ));
        assert!(matches!(
            IdentityClient::new(DEFAULT_AUTHORITY_HOST, "", "client"),
            Err(AuthError::InvalidClient(_))
        ));
    }

    #[test]
    fn malformed_authority_host_is_rejected() {
        assert!(matches!(
            IdentityClient::new("not a url", "contoso", "client"),
            Err(AuthError::InvalidClient(_))
        ));
    }

    #[test]
    fn authorize_url_carries_query_parameters() {
        let url = client()
            .authorize_url("http://localhost:8000/authorize", &["user.read"], None)
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/contoso/oauth2/v2.0/authorize");
        let query: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "client-1");
        assert_eq!(query["redirect_uri"], "http://localhost:8000/authorize");
        assert_eq!(query["response_mode"], "query");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["scope"], "user.read");
        assert!(!query.contains_key("state"));
    }

    #[test]
    fn interactive_session_includes_state() {
        let session = client()
            .start_interactive("http://localhost:8000/token", DEFAULT_SCOPES)
            .unwrap();
        assert_eq!(session.state.len(), 32);
        assert!(session
            .authorize_url
            .contains(&format!("state={}", session.state)));
    }

    #[test]
    fn reserved_scopes_are_appended_once() {
        assert_eq!(
            with_reserved_scopes(&["User.Read", "OpenID"]),
            "User.Read OpenID profile offline_access"
        );
    }

    #[test]
    fn invalid_grant_maps_to_expired_grant() {
        let err = token_error(StatusCode::BAD_REQUEST, br#"{"error":"invalid_grant"}"#);
        assert!(matches!(err, AuthError::ExpiredOrInvalidGrant));
        let err = token_error(StatusCode::INTERNAL_SERVER_ERROR, b"boom");
        assert!(matches!(err, AuthError::Provider { status: 500, .. }));
    }
}
