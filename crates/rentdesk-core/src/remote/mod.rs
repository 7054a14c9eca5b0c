pub mod gateway;
pub mod history;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::feed::types::FeedEvent;
use crate::models::MessageAction;
use history::StatusRecord;

/// Source of the authoritative reservation status log.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn status_log(&self, conversation_id: &str) -> Result<Vec<StatusRecord>, CoreError>;
}

/// Source of the one-shot feed snapshot used during a conversation load.
#[async_trait]
pub trait FeedSnapshotSource: Send + Sync {
    async fn poll(&self, topic: &str) -> Result<Vec<FeedEvent>, CoreError>;
}

/// Outbound side of the gateway. No acknowledgement beyond HTTP status is
/// awaited.
#[async_trait]
pub trait OutboundGateway: Send + Sync {
    async fn publish_text(
        &self,
        topic: &str,
        body: &str,
        tags: &[String],
        actions: &[MessageAction],
    ) -> Result<(), CoreError>;

    async fn publish_attachment(
        &self,
        topic: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<(), CoreError>;
}
