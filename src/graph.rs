//! Microsoft Graph call made with an acquired access token.

use crate::error::Result;

/// Graph response body as received, whatever the status.
#[derive(Debug, Clone)]
pub struct GraphResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Minimal Graph client: `GET /v1.0/me/`.
pub struct GraphClient {
    client: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch the signed-in user's profile. Error statuses come back with
    /// their body so the caller can show what Graph said.
    pub async fn me(&self, bearer: &str) -> Result<GraphResponse> {
        let url = format!("{}/v1.0/me/", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {bearer}"))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Graph returned an error status");
        }
        let body = resp.bytes().await?.to_vec();
        Ok(GraphResponse {
            status: status.as_u16(),
            body,
        })
    }
}
