use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::HistorySource;
use crate::auth::TokenProvider;
use crate::error::CoreError;

/// One record of the remote status log: a historical, authoritative record
/// of a reservation's workflow-status transitions.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRecord {
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(rename = "statusCode", default)]
    pub status_code: Option<String>,
    #[serde(rename = "reasonHint", default)]
    pub reason_hint: Option<String>,
}

pub struct StatusLogClient {
    base_url: String,
    http: reqwest::Client,
    token: Arc<dyn TokenProvider>,
}

impl StatusLogClient {
    pub fn new(base_url: String, token: Arc<dyn TokenProvider>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            token,
        }
    }
}

#[async_trait]
impl HistorySource for StatusLogClient {
    async fn status_log(&self, conversation_id: &str) -> Result<Vec<StatusRecord>, CoreError> {
        let url = format!("{}/reservations/{}/status-log", self.base_url, conversation_id);
        let mut request = self.http.get(&url);
        if let Some(token) = self.token.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CoreError::Unauthorized),
            status if !status.is_success() => {
                Err(CoreError::Internal(anyhow!("status-log fetch failed: {status}")))
            }
            _ => Ok(response.json().await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_record_wire_names() {
        let json = r#"{"timestamp":1700000000000,"statusCode":"confirmed"}"#;
        let record: StatusRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status_code.as_deref(), Some("confirmed"));
        assert!(record.note.is_none());

        let json = r#"{"timestamp":1700000000000,"reasonHint":"returned","note":"All good"}"#;
        let record: StatusRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.reason_hint.as_deref(), Some("returned"));
        assert_eq!(record.note.as_deref(), Some("All good"));
    }
}
