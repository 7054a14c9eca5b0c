//! Pure translation from the three wire shapes (feed events, status-log
//! records, locally composed sends) into the canonical [`Message`]. Mapping
//! is total: malformed input degrades to a best-effort reconstruction
//! instead of failing the batch.

use uuid::Uuid;

use crate::feed::types::FeedEvent;
use crate::models::{Attachment, Message, MessageAction, MessageKind, MessageStatus, Sender};
use crate::remote::history::StatusRecord;

/// Reserved author name the gateway uses for workflow machinery.
pub const SYSTEM_AUTHOR: &str = "system";

const STATUS_TAG_PREFIX: &str = "status:";
const SYSTEM_TAG: &str = "system";

/// Map a live feed event. Returns `None` only for non-message event types
/// (keepalives, open markers); every message event maps.
pub fn from_feed_event(event: &FeedEvent, self_identity: &str) -> Option<Message> {
    if !event.is_message() {
        return None;
    }

    let author = event.author_title.as_deref();
    let has_system_tag = event.tags.iter().any(|t| t == SYSTEM_TAG);
    let sender = if author == Some(self_identity) {
        Sender::Operator
    } else if author == Some(SYSTEM_AUTHOR) || has_system_tag {
        Sender::System
    } else {
        Sender::Counterpart
    };

    let attachment: Option<Attachment> = event.attachment.as_ref().map(Into::into);
    let kind = if attachment.is_some() {
        MessageKind::Image
    } else if sender == Sender::System {
        MessageKind::SystemEvent
    } else {
        MessageKind::Text
    };

    let status_event = if sender == Sender::System {
        event
            .tags
            .iter()
            .find_map(|t| t.strip_prefix(STATUS_TAG_PREFIX))
            .map(str::to_string)
    } else {
        None
    };

    let actions: Vec<MessageAction> = event
        .actions
        .iter()
        .cloned()
        .filter_map(|spec| spec.into_action())
        .collect();

    Some(Message {
        id: event.id.clone(),
        sender,
        body: event.body.clone().unwrap_or_default(),
        attachment,
        kind,
        timestamp: event.time.saturating_mul(1000),
        status: MessageStatus::DeliveredUnread,
        status_event,
        tags: event.tags.clone(),
        actions,
    })
}

/// Map a status-log record. Always a system event. The id is derived
/// deterministically so a record re-fetched on the next full load dedupes
/// against the cached copy.
pub fn from_status_record(record: &StatusRecord) -> Message {
    let code = record
        .status_code
        .as_deref()
        .or(record.reason_hint.as_deref());

    let body = record
        .note
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .map(str::to_string)
        .or_else(|| code.and_then(status_code_text).map(str::to_string))
        .unwrap_or_else(|| "Reservation updated".to_string());

    Message {
        id: format!("status-{}-{}", record.timestamp, code.unwrap_or("note")),
        sender: Sender::System,
        body,
        attachment: None,
        kind: MessageKind::SystemEvent,
        timestamp: record.timestamp,
        status: MessageStatus::DeliveredUnread,
        status_event: record.status_code.clone(),
        tags: Vec::new(),
        actions: Vec::new(),
    }
}

/// Optimistic locally composed text message, shown before the remote send
/// resolves.
pub fn local_text(
    body: &str,
    tags: Vec<String>,
    actions: Vec<MessageAction>,
    now_ms: i64,
) -> Message {
    Message {
        id: Uuid::new_v4().to_string(),
        sender: Sender::Operator,
        body: body.to_string(),
        attachment: None,
        kind: MessageKind::Text,
        timestamp: now_ms,
        status: MessageStatus::PendingSend,
        status_event: None,
        tags,
        actions,
    }
}

/// Optimistic locally composed attachment message.
pub fn local_attachment(filename: &str, now_ms: i64) -> Message {
    Message {
        id: Uuid::new_v4().to_string(),
        sender: Sender::Operator,
        body: filename.to_string(),
        attachment: Some(Attachment {
            url: String::new(),
            name: filename.to_string(),
            content_type: None,
            size: None,
        }),
        kind: MessageKind::Image,
        timestamp: now_ms,
        status: MessageStatus::PendingSend,
        status_event: None,
        tags: Vec::new(),
        actions: Vec::new(),
    }
}

/// Ordered fallback table turning a reason code into display text.
fn status_code_text(code: &str) -> Option<&'static str> {
    const KNOWN: &[(&str, &str)] = &[
        ("quote-sent", "Quote sent to renter"),
        ("confirmed", "Reservation confirmed"),
        ("collected", "Vehicle collected"),
        ("returned", "Vehicle returned"),
        ("invoiced", "Invoice issued"),
        ("cancelled", "Reservation cancelled"),
    ];
    KNOWN.iter().find(|(c, _)| *c == code).map(|(_, text)| *text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::parse_line;

    const SELF: &str = "Depot Rentals";

    fn feed_event(json: &str) -> FeedEvent {
        parse_line(json).expect("test event should parse")
    }

    #[test]
    fn test_sender_resolution() {
        let own = feed_event(
            r#"{"id":"1","time":1700000000,"eventType":"message","topic":"R-1","body":"hi","authorTitle":"Depot Rentals"}"#,
        );
        assert_eq!(from_feed_event(&own, SELF).unwrap().sender, Sender::Operator);

        let renter = feed_event(
            r#"{"id":"2","time":1700000000,"eventType":"message","topic":"R-1","body":"hi","authorTitle":"Jamie Ward"}"#,
        );
        assert_eq!(from_feed_event(&renter, SELF).unwrap().sender, Sender::Counterpart);

        let system = feed_event(
            r#"{"id":"3","time":1700000000,"eventType":"message","topic":"R-1","body":"ok","authorTitle":"system"}"#,
        );
        assert_eq!(from_feed_event(&system, SELF).unwrap().sender, Sender::System);
    }

    #[test]
    fn test_system_tag_with_status_maps_to_system_event() {
        let event = feed_event(
            r#"{"id":"4","time":1700000000,"eventType":"message","topic":"R-1","body":"Reservation confirmed","authorTitle":"Jamie Ward","tags":["system","status:confirmed"]}"#,
        );
        let message = from_feed_event(&event, SELF).unwrap();
        assert_eq!(message.sender, Sender::System);
        assert_eq!(message.kind, MessageKind::SystemEvent);
        assert_eq!(message.status_event.as_deref(), Some("confirmed"));
        assert!(!message.counts_toward_unread(), "system events never count as unread");
    }

    #[test]
    fn test_attachment_forces_image_kind() {
        let event = feed_event(
            r#"{"id":"5","time":1700000000,"eventType":"message","topic":"R-1","authorTitle":"Jamie Ward","attachment":{"url":"https://files.example.com/x.jpg","name":"x.jpg"}}"#,
        );
        let message = from_feed_event(&event, SELF).unwrap();
        assert_eq!(message.kind, MessageKind::Image);
        assert_eq!(message.attachment.unwrap().name, "x.jpg");
        assert_eq!(message.body, "", "missing body degrades to empty text");
    }

    #[test]
    fn test_non_message_events_are_skipped() {
        let event = feed_event(r#"{"id":"6","time":1700000000,"eventType":"open","topic":"R-1"}"#);
        assert!(from_feed_event(&event, SELF).is_none());
    }

    #[test]
    fn test_feed_timestamp_is_seconds_to_millis() {
        let event = feed_event(
            r#"{"id":"7","time":1700000123,"eventType":"message","topic":"R-1","body":"x"}"#,
        );
        assert_eq!(from_feed_event(&event, SELF).unwrap().timestamp, 1_700_000_123_000);
    }

    #[test]
    fn test_absurd_feed_timestamp_saturates() {
        let event = feed_event(
            r#"{"id":"8","time":9223372036854775807,"eventType":"message","topic":"R-1","body":"x"}"#,
        );
        assert_eq!(from_feed_event(&event, SELF).unwrap().timestamp, i64::MAX);
    }

    #[test]
    fn test_status_record_prefers_note_over_code() {
        let record = StatusRecord {
            timestamp: 1_700_000_000_000,
            note: Some("Keys handed over at the depot".to_string()),
            status_code: Some("collected".to_string()),
            reason_hint: None,
        };
        let message = from_status_record(&record);
        assert_eq!(message.body, "Keys handed over at the depot");
        assert_eq!(message.sender, Sender::System);
        assert_eq!(message.kind, MessageKind::SystemEvent);
        assert_eq!(message.status_event.as_deref(), Some("collected"));
    }

    #[test]
    fn test_status_record_falls_back_through_code_table() {
        let coded = StatusRecord {
            timestamp: 1,
            note: None,
            status_code: Some("confirmed".to_string()),
            reason_hint: None,
        };
        assert_eq!(from_status_record(&coded).body, "Reservation confirmed");

        let hinted = StatusRecord {
            timestamp: 2,
            note: Some("   ".to_string()),
            status_code: None,
            reason_hint: Some("returned".to_string()),
        };
        assert_eq!(from_status_record(&hinted).body, "Vehicle returned");

        let unknown = StatusRecord {
            timestamp: 3,
            note: None,
            status_code: Some("repainted".to_string()),
            reason_hint: None,
        };
        assert_eq!(from_status_record(&unknown).body, "Reservation updated");
    }

    #[test]
    fn test_status_record_ids_are_deterministic() {
        let record = StatusRecord {
            timestamp: 42,
            note: None,
            status_code: Some("confirmed".to_string()),
            reason_hint: None,
        };
        assert_eq!(from_status_record(&record).id, from_status_record(&record).id);
    }

    #[test]
    fn test_local_text_is_pending_operator_message() {
        let message = local_text("On our way", Vec::new(), Vec::new(), 99);
        assert_eq!(message.sender, Sender::Operator);
        assert_eq!(message.status, MessageStatus::PendingSend);
        assert_eq!(message.timestamp, 99);
        assert!(!message.counts_toward_unread());
    }
}
