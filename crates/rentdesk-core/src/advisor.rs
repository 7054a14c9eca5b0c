use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::Message;

/// The fixed set of actions the advisor may suggest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdvisorAction {
    SendQuote,
    ConfirmReservation,
    RequestDocuments,
    ScheduleHandover,
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub action: AdvisorAction,
    pub reason: String,
}

/// AI-suggestion collaborator. Invoked after any inbound non-system message
/// with the recent transcript and the reservation's current status tag; the
/// store retains only the latest suggestion per conversation until it is
/// cleared or superseded.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn suggest(&self, recent: &[Message], status_tag: &str) -> Option<Suggestion>;
}

/// Advisor that never suggests anything, for wiring without an AI backend.
pub struct NullAdvisor;

#[async_trait]
impl Advisor for NullAdvisor {
    async fn suggest(&self, _recent: &[Message], _status_tag: &str) -> Option<Suggestion> {
        None
    }
}
