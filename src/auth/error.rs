use thiserror::Error;

/// Errors raised while acquiring tokens from the identity provider.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid client configuration: {0}")]
    InvalidClient(String),
    #[error("No cached account; sign in with another flow first")]
    NotLoggedIn,
    #[error("Access denied by the user or tenant policy")]
    AccessDenied,
    #[error("Device code expired before authorization completed")]
    DeviceCodeExpired,
    #[error("Expired or invalid grant")]
    ExpiredOrInvalidGrant,
    #[error("Provider rejected the request (status {status}): {body}")]
    Provider { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
