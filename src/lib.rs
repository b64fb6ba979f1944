//! oauthcli: OAuth2 flows against the Microsoft identity platform
//!
//! Runs the authorization code, device code, interactive, silent, and
//! username/password flows from the terminal, and hosts a small callback
//! server that receives browser redirects.
//!
//! # Quick Start
//!
//! ```no_run
//! use oauthcli::auth::{SilentProgress, DEFAULT_SCOPES};
//! use oauthcli::config::AppConfig;
//!
//! # async fn example() -> oauthcli::error::Result<()> {
//! let config = AppConfig::load(None)?;
//! let client = config.identity_client()?;
//! let challenge = client.start_device_code(DEFAULT_SCOPES).await?;
//! println!("Visit: {} and Enter: {}", challenge.verification_url, challenge.user_code);
//! let token = client
//!     .device_poller()
//!     .wait_for_authorization(&challenge, &SilentProgress)
//!     .await?;
//! println!("{}", token.access_token);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod graph;
pub mod render;
pub mod server;

#[cfg(feature = "cli")]
pub mod cli;
