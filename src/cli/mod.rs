//! CLI entry point for oauthcli.

pub mod flows;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::render::{OutputSink, Style, TerminalProgress, TerminalSink};
use crate::server::shutdown_signal;

/// Microsoft identity platform OAuth2 flows from the terminal
#[derive(Parser, Debug)]
#[command(name = "oauthcli", version, about = "Run OAuth2 flows against the Microsoft identity platform")]
pub struct Cli {
    /// Config file (default: ./oauthcli.toml, then ~/.oauthcli/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// One subcommand per flow.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the authorization code flow (redirects to the `api` server)
    Code,
    /// Runs the device code flow
    #[command(name = "d")]
    DeviceCode(DeviceCodeArgs),
    /// Runs the interactive browser flow, then calls Graph
    #[command(name = "i")]
    Interactive,
    /// Reacquires a cached token silently, then calls Graph
    #[command(name = "g")]
    Silent,
    /// Runs the username and password flow, then calls Graph
    #[command(
        name = "u",
        after_help = "Pass credentials as -u/--username and -p/--password. \
                      The single-dash long form (-username, -password) is not accepted."
    )]
    UsernamePassword(UsernamePasswordArgs),
    /// Runs the local server that receives redirect callbacks
    Api,
}

/// Arguments for `oauthcli d`.
#[derive(Args, Debug, Default)]
pub struct DeviceCodeArgs {
    /// Stop polling once the device code's advertised lifetime has passed
    #[arg(long)]
    pub enforce_expiry: bool,
}

/// Arguments for `oauthcli u`.
#[derive(Args, Debug)]
pub struct UsernamePasswordArgs {
    /// Account email address
    #[arg(short, long)]
    pub username: String,

    /// Account password
    #[arg(short, long)]
    pub password: String,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Load config and run the selected flow.
///
/// Every flow except `api` is raced against Ctrl-C/SIGTERM; the server
/// handles the signal itself so it can drain in-flight requests.
pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");
    let style = Style::detect();
    let sink: Arc<dyn OutputSink> = Arc::new(TerminalSink::new(style));

    let serves = matches!(cli.command, Commands::Api);
    let flow = dispatch(cli.command, &config, sink, style);
    if serves {
        return flow.await;
    }
    tokio::select! {
        result = flow => result,
        _ = shutdown_signal() => Err(CliError::Interrupted),
    }
}

async fn dispatch(
    command: Commands,
    config: &AppConfig,
    sink: Arc<dyn OutputSink>,
    style: Style,
) -> Result<()> {
    match command {
        Commands::Code => flows::handle_code(config),
        Commands::DeviceCode(args) => {
            let progress = TerminalProgress::new(style);
            flows::handle_device_code(config, &args, sink.as_ref(), &progress).await
        }
        Commands::Interactive => flows::handle_interactive(config, sink.as_ref()).await,
        Commands::Silent => flows::handle_silent(config, sink.as_ref()).await,
        Commands::UsernamePassword(args) => {
            flows::handle_username_password(config, &args, sink.as_ref()).await
        }
        Commands::Api => flows::handle_api(config, sink, shutdown_signal()).await,
    }
}

/// Map a [`CliError`] to a user-facing message with actionable guidance.
pub fn format_error_help(err: &CliError) -> String {
    use crate::auth::AuthError;

    match err {
        CliError::Configuration(msg) => format!(
            "Configuration error: {msg}. Check oauthcli.toml or the OAUTHCLI_* environment variables"
        ),
        CliError::Auth(AuthError::NotLoggedIn) => {
            "No cached account. Sign in first with: oauthcli d, oauthcli i, or oauthcli u"
                .to_string()
        }
        CliError::Auth(AuthError::DeviceCodeExpired) => {
            "Device code expired before sign-in completed. Run: oauthcli d".to_string()
        }
        CliError::Auth(AuthError::InvalidClient(msg)) => format!(
            "Invalid client configuration: {msg}. Check client_id and tenant_id"
        ),
        other => format!("{other}"),
    }
}
