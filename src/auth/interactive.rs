use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};

use super::error::AuthError;

const LANDING_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>oauthcli</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h2>Sign-in complete</h2>
<p>You can close this tab and return to the terminal.</p>
</body>
</html>"#;

/// One-shot listener that captures a single browser redirect.
pub struct RedirectCapture {
    listener: TcpListener,
    path: String,
}

impl RedirectCapture {
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs, path: &str) -> Result<Self, AuthError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AuthError> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the redirect and return its query parameters.
    pub async fn wait(self, timeout: Duration) -> Result<HashMap<String, String>, AuthError> {
        let (tx, rx) = oneshot::channel::<HashMap<String, String>>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let app = Router::new().route(
            &self.path,
            get(move |Query(params): Query<HashMap<String, String>>| {
                let tx = tx.clone();
                async move {
                    if let Some(sender) = tx.lock().await.take() {
                        let _ = sender.send(params);
                    }
                    Html(LANDING_PAGE)
                }
            }),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let mut task = tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let captured = tokio::time::timeout(timeout, rx).await;
        let _ = shutdown_tx.send(());
        // Let the landing page flush before tearing the listener down.
        if tokio::time::timeout(Duration::from_secs(1), &mut task)
            .await
            .is_err()
        {
            task.abort();
        }

        match captured {
            Ok(Ok(params)) => {
                tracing::debug!(params = params.len(), "redirect captured");
                Ok(params)
            }
            Ok(Err(_)) => Err(AuthError::InvalidResponse(
                "Redirect listener stopped before a redirect arrived".to_string(),
            )),
            Err(_) => Err(AuthError::Timeout("the browser redirect".to_string())),
        }
    }
}
