//! OAuth2 flows against the Microsoft identity platform, plus the token cache.

pub mod client;
pub mod device_code;
pub mod error;
pub mod interactive;
pub mod store;
pub mod token;

pub use client::{
    AuthCodeRedeemer, IdentityClient, InteractiveSession, DEFAULT_AUTHORITY_HOST, DEFAULT_SCOPES,
};
pub use device_code::{
    classify, DeviceCodeChallenge, DevicePoller, PollOutcome, PollProgress, SilentProgress,
    DEVICE_CODE_GRANT_TYPE,
};
pub use error::AuthError;
pub use interactive::RedirectCapture;
pub use store::{FileTokenStore, TokenStore, TokenStoreConfig};
pub use token::{Token, TokenResponse};
