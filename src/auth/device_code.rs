use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use super::error::AuthError;
use super::token::TokenResponse;

/// Grant type sent with every device-code token request.
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Device-code challenge issued by the provider.
///
/// # Example
/// ```no_run
/// use oauthcli::auth::DeviceCodeChallenge;
/// use chrono::{Duration, Utc};
///
/// let challenge = DeviceCodeChallenge {
///     device_code: "device-code".to_string(),
///     user_code: "ABCD-EFGH".to_string(),
///     verification_url: "https://microsoft.com/devicelogin".to_string(),
///     interval_secs: 5,
///     expires_at: Utc::now() + Duration::minutes(15),
///     message: None,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct DeviceCodeChallenge {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    pub interval_secs: u64,
    pub expires_at: DateTime<Utc>,
    pub message: Option<String>,
}

/// Result of a single token request for a device code.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Success(TokenResponse),
    /// The user has not finished authorizing yet.
    Pending,
    Denied,
    Expired,
    /// Provider-reported error other than denial or expiry.
    Rejected { status: u16, body: String },
    TransportError(String),
}

impl PollOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Observer for the waiting phase of a polling session.
pub trait PollProgress: Send + Sync {
    /// Called after the `attempt`-th request came back pending.
    fn on_pending(&self, _attempt: u32) {}

    /// Called once per elapsed tick while waiting for the next attempt.
    /// `index` restarts at zero for every wait.
    fn on_tick(&self, index: u64);
}

/// Progress observer that reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl PollProgress for SilentProgress {
    fn on_tick(&self, _index: u64) {}
}

/// Polls the token endpoint until a device-code authorization settles.
///
/// Polling is unbounded by default: the challenge's `expires_at` is only
/// honoured when [`with_expiry_check`](Self::with_expiry_check) is enabled.
pub struct DevicePoller {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    tick: Duration,
    check_expiry: bool,
}

impl DevicePoller {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            tick: Duration::from_secs(1),
            check_expiry: false,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Length of one progress tick. The wait between attempts is
    /// `interval_secs` ticks.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_expiry_check(mut self, enabled: bool) -> Self {
        self.check_expiry = enabled;
        self
    }

    /// Submit one token request for the challenge's device code.
    ///
    /// Transport failures come back as [`PollOutcome::TransportError`]; a
    /// success status with an unusable body is an error.
    pub async fn poll_once(
        &self,
        challenge: &DeviceCodeChallenge,
    ) -> Result<PollOutcome, AuthError> {
        let sent = self
            .client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_secret", self.client_secret.as_str()),
                ("client_id", self.client_id.as_str()),
                ("device_code", challenge.device_code.as_str()),
                ("grant_type", DEVICE_CODE_GRANT_TYPE),
            ])
            .send()
            .await;
        let resp = match sent {
            Ok(resp) => resp,
            Err(err) => return Ok(PollOutcome::TransportError(err.to_string())),
        };
        let status = resp.status();
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(err) => return Ok(PollOutcome::TransportError(err.to_string())),
        };
        classify(status, &body)
    }

    /// Poll until the provider reports anything other than pending.
    pub async fn wait_for_authorization(
        &self,
        challenge: &DeviceCodeChallenge,
        progress: &dyn PollProgress,
    ) -> Result<TokenResponse, AuthError> {
        let mut attempt: u32 = 0;
        loop {
            if self.check_expiry && Utc::now() >= challenge.expires_at {
                tracing::warn!(attempts = attempt, "device code expired locally");
                return Err(AuthError::DeviceCodeExpired);
            }
            attempt += 1;
            match self.poll_once(challenge).await? {
                PollOutcome::Pending => {
                    tracing::debug!(attempt, "authorization pending");
                    progress.on_pending(attempt);
                    self.wait_interval(challenge.interval_secs, progress).await;
                }
                PollOutcome::Success(token) => {
                    tracing::info!(attempts = attempt, "device authorization complete");
                    return Ok(token);
                }
                PollOutcome::Denied => return Err(AuthError::AccessDenied),
                PollOutcome::Expired => return Err(AuthError::DeviceCodeExpired),
                PollOutcome::Rejected { status, body } => {
                    return Err(AuthError::Provider { status, body })
                }
                PollOutcome::TransportError(detail) => return Err(AuthError::Network(detail)),
            }
        }
    }

    async fn wait_interval(&self, interval_secs: u64, progress: &dyn PollProgress) {
        // A zero interval would spin against the endpoint.
        for index in 0..interval_secs.max(1) {
            progress.on_tick(index);
            tokio::time::sleep(self.tick).await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: Option<String>,
}

fn error_code(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.error)
}

/// Map a token-endpoint response onto a [`PollOutcome`].
///
/// A 400 means "not yet" unless its body names a terminal error.
pub fn classify(status: StatusCode, body: &[u8]) -> Result<PollOutcome, AuthError> {
    if status == StatusCode::BAD_REQUEST {
        return Ok(match error_code(body).as_deref() {
            Some("access_denied") | Some("authorization_declined") => PollOutcome::Denied,
            Some("expired_token") | Some("code_expired") => PollOutcome::Expired,
            _ => PollOutcome::Pending,
        });
    }
    if status.is_success() {
        return TokenResponse::from_slice(body).map(PollOutcome::Success);
    }
    Ok(match error_code(body).as_deref() {
        Some("access_denied") | Some("authorization_declined") => PollOutcome::Denied,
        Some("expired_token") | Some("code_expired") => PollOutcome::Expired,
        _ => PollOutcome::Rejected {
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).into_owned(),
        },
    })
}
