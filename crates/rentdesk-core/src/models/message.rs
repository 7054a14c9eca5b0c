use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Who authored a message, resolved against the authenticated operator
/// identity at mapping time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sender {
    /// The operator themselves (the authenticated identity).
    Operator,
    /// The renter on the other side of the conversation.
    Counterpart,
    /// Workflow/status machinery, never a human.
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Text,
    SystemEvent,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageStatus {
    /// Optimistic local message, remote send not yet confirmed.
    PendingSend,
    DeliveredUnread,
    DeliveredRead,
}

/// Actionable button forwarded from the feed gateway.
/// Closed set - unknown action kinds are dropped at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MessageAction {
    View {
        label: String,
        url: String,
    },
    HttpCall {
        label: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    Broadcast {
        label: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Canonical message representation, shared by all three wire sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique within a conversation; deduplication key across sources.
    pub id: String,
    pub sender: Sender,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub kind: MessageKind,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub status: MessageStatus,
    /// Domain status tag carried by system messages (e.g. "confirmed").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_event: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<MessageAction>,
}

impl Message {
    /// Whether this message contributes to the conversation's unread count.
    /// Own and system messages never do.
    pub fn counts_toward_unread(&self) -> bool {
        !matches!(self.sender, Sender::Operator | Sender::System)
            && self.status == MessageStatus::DeliveredUnread
    }

    /// Transition delivered-unread -> delivered-read. Returns true if a
    /// transition happened. Pending sends and already-read messages are
    /// left alone, keeping the transition monotonic.
    pub fn mark_read(&mut self) -> bool {
        if self.status == MessageStatus::DeliveredUnread {
            self.status = MessageStatus::DeliveredRead;
            true
        } else {
            false
        }
    }

    /// The one allowed backward transition: a full unread-reset flips
    /// delivered-read back to delivered-unread.
    pub fn reset_unread(&mut self) -> bool {
        if self.status == MessageStatus::DeliveredRead {
            self.status = MessageStatus::DeliveredUnread;
            true
        } else {
            false
        }
    }
}
