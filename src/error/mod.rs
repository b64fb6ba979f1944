//! Error types for oauthcli.

use thiserror::Error;

use crate::auth::AuthError;
use crate::server::ServerError;

/// Top-level error; everything below `main` propagates one of these.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Callback server error: {0}")]
    Server(#[from] ServerError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Interrupted")]
    Interrupted,
}

impl From<toml::de::Error> for CliError {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_convert_and_keep_their_message() {
        let err: CliError = AuthError::AccessDenied.into();
        assert!(matches!(err, CliError::Auth(AuthError::AccessDenied)));
        assert_eq!(
            err.to_string(),
            "Authentication error: Access denied by the user or tenant policy"
        );
    }

    #[test]
    fn toml_errors_are_configuration_errors() {
        let parse = toml::from_str::<toml::Table>("client_id = ").unwrap_err();
        let err: CliError = parse.into();
        assert!(matches!(err, CliError::Configuration(_)));
    }
}
