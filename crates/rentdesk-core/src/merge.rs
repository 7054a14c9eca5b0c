//! Combines mapped messages from all sources into one ordered, deduplicated,
//! status-preserving list per conversation.

use std::collections::HashMap;

use crate::models::{Message, MessageStatus};

/// Full-load merge: previously cached messages, freshly mapped status-log
/// messages, freshly mapped feed messages. Deduplicates by id; a fresh
/// occurrence supplies the content while a previously recorded
/// delivered-read status survives (the read transition is monotonic).
/// Stable-sorted by timestamp ascending. The result replaces the
/// conversation's message list wholesale.
pub fn merge_full(cached: &[Message], history: Vec<Message>, feed: Vec<Message>) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(cached.len() + history.len() + feed.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for message in cached.iter().cloned().chain(history).chain(feed) {
        fold(&mut merged, &mut index, message);
    }

    merged.sort_by_key(|m| m.timestamp);
    merged
}

/// Incremental merge for push events: append-and-deduplicate into an
/// existing list, preserving read status of any message that reappears.
pub fn merge_incremental(existing: &mut Vec<Message>, incoming: Vec<Message>) {
    let mut index: HashMap<String, usize> = existing
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id.clone(), i))
        .collect();

    for message in incoming {
        fold(existing, &mut index, message);
    }

    existing.sort_by_key(|m| m.timestamp);
}

fn fold(list: &mut Vec<Message>, index: &mut HashMap<String, usize>, message: Message) {
    match index.get(&message.id) {
        Some(&slot) => {
            let was_read = list[slot].status == MessageStatus::DeliveredRead
                || message.status == MessageStatus::DeliveredRead;
            let mut replacement = message;
            if was_read {
                replacement.status = MessageStatus::DeliveredRead;
            }
            list[slot] = replacement;
        }
        None => {
            index.insert(message.id.clone(), list.len());
            list.push(message);
        }
    }
}
