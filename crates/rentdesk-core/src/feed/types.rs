use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::models::{Attachment, MessageAction};

/// One event off the live feed gateway, one JSON object per line.
/// Only `eventType = "message"` is consumed; keepalives and open markers
/// carry the other event types.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedEvent {
    pub id: String,
    /// Epoch seconds.
    pub time: i64,
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub topic: String,
    #[serde(default)]
    pub body: Option<String>,
    /// Declared author display name; compared against the authenticated
    /// identity to resolve the sender.
    #[serde(rename = "authorTitle", default)]
    pub author_title: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachment: Option<FeedAttachment>,
    #[serde(rename = "clickUrl", default)]
    pub click_url: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

pub const EVENT_TYPE_MESSAGE: &str = "message";

impl FeedEvent {
    pub fn is_message(&self) -> bool {
        self.event_type == EVENT_TYPE_MESSAGE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedAttachment {
    pub url: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl From<&FeedAttachment> for Attachment {
    fn from(a: &FeedAttachment) -> Self {
        Attachment {
            url: a.url.clone(),
            name: a.name.clone(),
            content_type: a.content_type.clone(),
            size: a.size,
        }
    }
}

/// Raw action record as it appears on the wire. Parsed into the closed
/// [`MessageAction`] set; unknown action kinds are dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionSpec {
    pub action: String,
    pub label: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl ActionSpec {
    pub fn into_action(self) -> Option<MessageAction> {
        match self.action.as_str() {
            "view" => Some(MessageAction::View {
                label: self.label,
                url: self.url?,
            }),
            "http" => Some(MessageAction::HttpCall {
                label: self.label,
                url: self.url?,
                method: self.method,
                headers: self.headers,
                body: self.body,
            }),
            "broadcast" => Some(MessageAction::Broadcast { label: self.label }),
            other => {
                debug!(action = other, "dropping unknown feed action kind");
                None
            }
        }
    }
}

/// Parse one feed line. Malformed lines are dropped with a debug log and
/// never abort the rest of a batch or the connection.
pub fn parse_line(line: &str) -> Option<FeedEvent> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<FeedEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "dropping malformed feed line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{"id":"ev-1","time":1700000000,"eventType":"message","topic":"R-100","body":"When can I collect?","authorTitle":"Jamie Ward","priority":3,"tags":["booking"],"clickUrl":"https://app.example.com/r/R-100","actions":[{"action":"view","label":"Open reservation","url":"https://app.example.com/r/R-100"},{"action":"dance","label":"??"}]}"#;

    #[test]
    fn test_parse_message_event() {
        let event = parse_line(SAMPLE).expect("sample line should parse");
        assert!(event.is_message());
        assert_eq!(event.topic, "R-100");
        assert_eq!(event.body.as_deref(), Some("When can I collect?"));
        assert_eq!(event.author_title.as_deref(), Some("Jamie Ward"));
        assert_eq!(event.tags, vec!["booking"]);
    }

    #[test]
    fn test_unknown_action_kind_is_dropped() {
        let event = parse_line(SAMPLE).unwrap();
        let actions: Vec<MessageAction> = event
            .actions
            .into_iter()
            .filter_map(ActionSpec::into_action)
            .collect();
        assert_eq!(actions.len(), 1, "only the view action survives");
        assert!(matches!(actions[0], MessageAction::View { .. }));
    }

    #[test]
    fn test_view_action_without_url_is_dropped() {
        let spec = ActionSpec {
            action: "view".to_string(),
            label: "broken".to_string(),
            url: None,
            method: None,
            headers: BTreeMap::new(),
            body: None,
        };
        assert!(spec.into_action().is_none());
    }

    #[test]
    fn test_attachment_parse() {
        let line = r#"{"id":"ev-2","time":1700000001,"eventType":"message","topic":"R-100","attachment":{"url":"https://files.example.com/x.jpg","name":"x.jpg","type":"image/jpeg","size":2048}}"#;
        let event = parse_line(line).unwrap();
        let attachment = event.attachment.expect("attachment should parse");
        assert_eq!(attachment.name, "x.jpg");
        assert_eq!(attachment.size, Some(2048));
    }

    #[test]
    fn test_malformed_and_blank_lines_drop() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("{not json").is_none());
        assert!(parse_line(r#"{"id":"x"}"#).is_none(), "missing fields drop too");
    }

    #[test]
    fn test_keepalive_is_not_a_message() {
        let line = r#"{"id":"ka","time":1700000002,"eventType":"keepalive","topic":"R-100"}"#;
        let event = parse_line(line).unwrap();
        assert!(!event.is_message());
    }
}
