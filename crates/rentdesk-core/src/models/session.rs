use serde::{Deserialize, Serialize};

use super::message::{Message, MessageKind};

const PREVIEW_MAX_CHARS: usize = 80;

/// Display identity of the renter on the other side of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterpart {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Counterpart {
    pub fn unknown() -> Self {
        Self {
            name: "Unknown renter".to_string(),
            avatar_url: None,
            online: false,
            role: None,
        }
    }
}

/// Denormalized snapshot of the related reservation, so list and timeline
/// consumers can render without re-fetching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationSummary {
    pub vehicle: String,
    pub status: String,
    pub price: f64,
    /// Epoch milliseconds.
    pub starts_at: i64,
    /// Epoch milliseconds.
    pub ends_at: i64,
}

/// One conversation, tied to one reservation. The id doubles as the live
/// feed topic once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: String,
    pub counterpart: Counterpart,
    /// Insertion order equals chronological order after merge.
    pub messages: Vec<Message>,
    pub last_message_preview: String,
    /// Epoch milliseconds of the newest message, 0 when empty.
    pub last_message_at: i64,
    pub unread_count: u32,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReservationSummary>,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>, counterpart: Counterpart) -> Self {
        Self {
            id: id.into(),
            counterpart,
            messages: Vec::new(),
            last_message_preview: String::new(),
            last_message_at: 0,
            unread_count: 0,
            archived: false,
            summary: None,
        }
    }

    /// Recompute `unread_count` from the message list. Invariant: the count
    /// always equals the number of delivered-unread messages not sent by the
    /// operator or the system.
    pub fn recount_unread(&mut self) {
        self.unread_count = self
            .messages
            .iter()
            .filter(|m| m.counts_toward_unread())
            .count() as u32;
    }

    /// Refresh the denormalized preview fields from the newest message.
    pub fn touch_preview(&mut self) {
        match self.messages.last() {
            Some(last) => {
                self.last_message_preview = preview_of(last);
                self.last_message_at = last.timestamp;
            }
            None => {
                self.last_message_preview.clear();
                self.last_message_at = 0;
            }
        }
    }

    /// Replace the message list wholesale (full load path) and refresh the
    /// denormalized fields.
    pub fn apply_messages(&mut self, merged: Vec<Message>) {
        self.messages = merged;
        self.touch_preview();
        self.recount_unread();
    }

    /// Copy with `messages` emptied, the shape stored in the backup
    /// snapshot tier.
    pub fn stripped(&self) -> Self {
        let mut copy = self.clone();
        copy.messages = Vec::new();
        copy
    }
}

fn preview_of(message: &Message) -> String {
    let text = match message.kind {
        MessageKind::Image => message
            .attachment
            .as_ref()
            .map(|a| a.name.as_str())
            .unwrap_or("Image"),
        _ => message.body.as_str(),
    };
    text.chars().take(PREVIEW_MAX_CHARS).collect()
}
