use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::{FeedSnapshotSource, OutboundGateway};
use crate::auth::TokenProvider;
use crate::error::CoreError;
use crate::feed::types::{parse_line, FeedEvent};
use crate::models::MessageAction;

/// HTTP client for the live feed gateway: outbound sends, snapshot polls,
/// and the streaming subscription the multiplexer reads from.
pub struct GatewayClient {
    base_url: String,
    http: reqwest::Client,
    token: Arc<dyn TokenProvider>,
}

impl GatewayClient {
    pub fn new(base_url: String, token: Arc<dyn TokenProvider>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            token,
        }
    }

    /// URL of the streaming subscription covering every given topic on one
    /// connection.
    pub fn subscribe_url(&self, topics: &[String]) -> String {
        format!("{}/{}/json", self.base_url, topics.join(","))
    }

    /// Open the streaming connection. The caller owns reading lines off the
    /// response body.
    pub async fn open_stream(&self, topics: &[String]) -> Result<reqwest::Response, CoreError> {
        let mut request = self.http.get(self.subscribe_url(topics));
        if let Some(token) = self.token.bearer_token() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CoreError::Unauthorized),
            status if !status.is_success() => {
                Err(CoreError::Internal(anyhow!("feed subscribe failed: {status}")))
            }
            _ => Ok(response),
        }
    }

    fn check_publish_status(status: StatusCode) -> Result<(), CoreError> {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CoreError::Unauthorized),
            status if !status.is_success() => {
                Err(CoreError::Internal(anyhow!("gateway publish failed: {status}")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl FeedSnapshotSource for GatewayClient {
    async fn poll(&self, topic: &str) -> Result<Vec<FeedEvent>, CoreError> {
        let url = format!("{}/{}/json?poll=1", self.base_url, topic);
        let mut request = self.http.get(&url);
        if let Some(token) = self.token.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(CoreError::Unauthorized)
            }
            status if !status.is_success() => {
                return Err(CoreError::Internal(anyhow!("feed poll failed: {status}")))
            }
            _ => {}
        }

        let text = response.text().await?;
        let events: Vec<FeedEvent> = text.lines().filter_map(parse_line).collect();
        debug!(topic, count = events.len(), "feed snapshot polled");
        Ok(events)
    }
}

#[async_trait]
impl OutboundGateway for GatewayClient {
    async fn publish_text(
        &self,
        topic: &str,
        body: &str,
        tags: &[String],
        actions: &[MessageAction],
    ) -> Result<(), CoreError> {
        let url = format!("{}/{}", self.base_url, topic);
        let mut request = self.http.post(&url).body(body.to_string());
        if let Some(token) = self.token.bearer_token() {
            request = request.bearer_auth(token);
        }
        if !tags.is_empty() {
            request = request.header("X-Tags", tags.join(","));
        }
        if !actions.is_empty() {
            request = request.header("X-Actions", serde_json::to_string(actions)?);
        }

        let response = request.send().await?;
        Self::check_publish_status(response.status())
    }

    async fn publish_attachment(
        &self,
        topic: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<(), CoreError> {
        let url = format!("{}/{}", self.base_url, topic);
        let mut request = self
            .http
            .put(&url)
            .header("X-Filename", filename.to_string())
            .body(bytes);
        if let Some(token) = self.token.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        Self::check_publish_status(response.status())
    }
}
