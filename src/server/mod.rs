//! Local callback server for redirect-based flows.
//!
//! Two routes: `/authorize` redeems the authorization code it receives and
//! `/token` shows whatever body it is sent. Output goes to the terminal
//! sink; clients only ever get a status code back.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{any, get};
use axum::Router;
use thiserror::Error;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::oneshot;
use tower_http::timeout::TimeoutLayer;

use crate::auth::{AuthCodeRedeemer, DEFAULT_SCOPES};
use crate::config::{AUTHORIZE_PATH, TOKEN_PATH};
use crate::render::OutputSink;

/// Deadline for in-flight requests once shutdown starts.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind callback listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("Listener failed: {0}")]
    Listen(#[source] std::io::Error),
    #[error("Listener stopped unexpectedly")]
    Stopped,
    #[error("Server task failed: {0}")]
    Task(String),
}

/// Shared handler state.
#[derive(Clone)]
pub struct CallbackState {
    redeemer: Arc<dyn AuthCodeRedeemer>,
    sink: Arc<dyn OutputSink>,
    redirect_uri: String,
}

impl CallbackState {
    /// `redirect_uri` must be the one the authorize request was sent with.
    pub fn new(
        redeemer: Arc<dyn AuthCodeRedeemer>,
        sink: Arc<dyn OutputSink>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            redeemer,
            sink,
            redirect_uri: redirect_uri.into(),
        }
    }
}

pub fn router(state: CallbackState) -> Router {
    Router::new()
        .route(AUTHORIZE_PATH, get(authorize))
        .route(TOKEN_PATH, any(token))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

async fn authorize(
    State(state): State<CallbackState>,
    Query(params): Query<Vec<(String, String)>>,
) -> StatusCode {
    let Some(code) = params
        .iter()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.as_str())
    else {
        // The provider redirects here with error/error_description instead.
        tracing::warn!("authorize callback without a code");
        let query: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        emit_json(&*state.sink, &serde_json::Value::Object(query));
        return StatusCode::BAD_REQUEST;
    };

    match state
        .redeemer
        .redeem_auth_code(code, &state.redirect_uri, DEFAULT_SCOPES)
        .await
    {
        Ok(token) => {
            tracing::info!("authorization code redeemed");
            emit_json(&*state.sink, &token.raw);
            StatusCode::OK
        }
        Err(err) => {
            tracing::error!(error = %err, "authorization code redemption failed");
            StatusCode::BAD_GATEWAY
        }
    }
}

async fn token(State(state): State<CallbackState>, body: Bytes) -> StatusCode {
    tracing::debug!(bytes = body.len(), "token callback");
    state.sink.emit(&body);
    StatusCode::OK
}

fn emit_json(sink: &dyn OutputSink, value: &serde_json::Value) {
    match serde_json::to_vec(value) {
        Ok(bytes) => sink.emit(&bytes),
        Err(err) => tracing::error!(error = %err, "encoding payload"),
    }
}

/// Bound callback listener, ready to serve.
pub struct CallbackServer {
    listener: TcpListener,
    app: Router,
    shutdown_timeout: Duration,
}

impl CallbackServer {
    pub async fn bind(addr: impl ToSocketAddrs, state: CallbackState) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
        Ok(Self {
            listener,
            app: router(state),
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        })
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Listen)
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests for up
    /// to the shutdown timeout before closing the listener.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let Self {
            listener,
            app,
            shutdown_timeout,
        } = self;
        let addr = listener.local_addr().map_err(ServerError::Listen)?;
        tracing::info!(%addr, "callback server listening");

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let mut task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::select! {
            joined = &mut task => {
                return match joined {
                    Ok(Ok(())) => Err(ServerError::Stopped),
                    Ok(Err(err)) => Err(ServerError::Listen(err)),
                    Err(err) => Err(ServerError::Task(err.to_string())),
                };
            }
            _ = shutdown => {}
        }

        tracing::info!("starting shutdown");
        let _ = stop_tx.send(());
        match tokio::time::timeout(shutdown_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!("callback server stopped");
                Ok(())
            }
            Ok(Ok(Err(err))) => Err(ServerError::Listen(err)),
            Ok(Err(err)) => Err(ServerError::Task(err.to_string())),
            Err(_) => {
                tracing::warn!(
                    timeout = ?shutdown_timeout,
                    "graceful shutdown did not complete, closing listener"
                );
                task.abort();
                Ok(())
            }
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "installing Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "installing SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
