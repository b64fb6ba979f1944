//! One handler per subcommand.
//!
//! Handlers acquire a token through [`IdentityClient`], hand payloads to the
//! [`OutputSink`], and for `i`/`g`/`u` follow up with a Graph `/me` call.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{PollProgress, RedirectCapture, DEFAULT_SCOPES};
use crate::config::{AppConfig, AUTHORIZE_PATH, TOKEN_PATH};
use crate::error::Result;
use crate::graph::GraphClient;
use crate::render::OutputSink;
use crate::server::{CallbackServer, CallbackState};

use super::{DeviceCodeArgs, UsernamePasswordArgs};

/// How long `i` waits for the browser to come back.
pub const INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(300);

/// `code`: print the authorize URL and try to open it.
///
/// The redirect lands on the `api` server, which redeems the code.
pub fn handle_code(config: &AppConfig) -> Result<()> {
    let client = config.identity_client()?;
    let url = client.authorize_url(&config.redirect_uri(AUTHORIZE_PATH), DEFAULT_SCOPES, None)?;
    println!("{url}");
    open_browser(&url);
    Ok(())
}

/// `d`: device code flow.
pub async fn handle_device_code(
    config: &AppConfig,
    args: &DeviceCodeArgs,
    sink: &dyn OutputSink,
    progress: &dyn PollProgress,
) -> Result<()> {
    let client = config.identity_client()?;
    let challenge = client.start_device_code(DEFAULT_SCOPES).await?;
    if let Some(message) = &challenge.message {
        tracing::debug!(%message, "device code instructions");
    }
    println!(
        "Visit: {} and Enter: {}",
        challenge.verification_url, challenge.user_code
    );

    let poller = client.device_poller().with_expiry_check(args.enforce_expiry);
    let token = poller.wait_for_authorization(&challenge, progress).await;
    // Terminate the progress line whatever the outcome.
    println!();
    let token = token?;

    client.remember(&token)?;
    emit_json(sink, &token.raw)
}

/// `i`: browser sign-in with the redirect captured on `/token`.
pub async fn handle_interactive(config: &AppConfig, sink: &dyn OutputSink) -> Result<()> {
    let client = config.identity_client()?;
    let capture = RedirectCapture::bind(("localhost", config.port), TOKEN_PATH).await?;
    let session = client.start_interactive(&config.redirect_uri(TOKEN_PATH), DEFAULT_SCOPES)?;

    println!("Sign in at: {}", session.authorize_url);
    open_browser(&session.authorize_url);

    let params = capture.wait(INTERACTIVE_TIMEOUT).await?;
    let token = client
        .finish_interactive(&session, &params, DEFAULT_SCOPES)
        .await?;
    emit_json(sink, &token.raw)?;
    call_graph(config, &token.access_token, sink).await
}

/// `g`: reacquire from the cache, refreshing when needed.
pub async fn handle_silent(config: &AppConfig, sink: &dyn OutputSink) -> Result<()> {
    let client = config.identity_client()?;
    let token = client.acquire_token_silent(DEFAULT_SCOPES).await?;
    sink.emit(&serde_json::to_vec(&token)?);
    call_graph(config, &token.access_token, sink).await
}

/// `u`: resource-owner password grant.
pub async fn handle_username_password(
    config: &AppConfig,
    args: &UsernamePasswordArgs,
    sink: &dyn OutputSink,
) -> Result<()> {
    let client = config.identity_client()?;
    let token = client
        .acquire_token_by_username_password(&args.username, &args.password, DEFAULT_SCOPES)
        .await?;
    emit_json(sink, &token.raw)?;
    call_graph(config, &token.access_token, sink).await
}

/// `api`: serve `/authorize` and `/token` until `shutdown` resolves.
pub async fn handle_api<F>(config: &AppConfig, sink: Arc<dyn OutputSink>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let client = Arc::new(config.identity_client()?);
    let state = CallbackState::new(client, sink, config.redirect_uri(AUTHORIZE_PATH));
    let server = CallbackServer::bind(("localhost", config.port), state).await?;
    println!("Listening on http://localhost:{}", config.port);
    server.serve_until(shutdown).await?;
    Ok(())
}

async fn call_graph(config: &AppConfig, access_token: &str, sink: &dyn OutputSink) -> Result<()> {
    let response = GraphClient::new(config.graph_url.as_str())
        .me(access_token)
        .await?;
    tracing::debug!(status = response.status, "Graph /me");
    sink.emit(&response.body);
    Ok(())
}

fn emit_json(sink: &dyn OutputSink, value: &serde_json::Value) -> Result<()> {
    sink.emit(&serde_json::to_vec(value)?);
    Ok(())
}

fn open_browser(url: &str) {
    let _ = std::io::stdout().flush();
    if let Err(err) = open::that(url) {
        tracing::warn!(error = %err, "could not open a browser; open the URL manually");
    }
}
