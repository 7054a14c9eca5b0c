use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::models::ConversationSession;

/// Degraded backup tier: a synchronous, quota-constrained snapshot of
/// session metadata (no message bodies) for rapid cold-start rendering when
/// the primary store is unavailable. Written opportunistically, never
/// authoritative; every failure is a warning, not an error.
pub struct BackupSnapshot {
    path: PathBuf,
    max_bytes: usize,
}

impl BackupSnapshot {
    pub fn new<P: AsRef<Path>>(dir: P, max_bytes: usize) -> Self {
        Self {
            path: dir.as_ref().join("sessions.backup.json"),
            max_bytes,
        }
    }

    pub fn write(&self, sessions: &[ConversationSession]) {
        let stripped: Vec<ConversationSession> = sessions.iter().map(|s| s.stripped()).collect();

        let bytes = match serde_json::to_vec(&stripped) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "backup snapshot serialization failed");
                return;
            }
        };

        if bytes.len() > self.max_bytes {
            warn!(
                size = bytes.len(),
                quota = self.max_bytes,
                "backup snapshot over quota, skipping write"
            );
            return;
        }

        if let Err(e) = std::fs::write(&self.path, bytes) {
            warn!(error = %e, "backup snapshot write failed");
        }
    }

    /// Best-effort read. Missing or undecodable snapshots yield an empty
    /// list.
    pub fn read(&self) -> Vec<ConversationSession> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "no backup snapshot available");
                return Vec::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "backup snapshot undecodable, ignoring");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Counterpart, Message, MessageKind, MessageStatus, Sender};
    use tempfile::tempdir;

    fn session(id: &str) -> ConversationSession {
        let mut session = ConversationSession::new(id, Counterpart::unknown());
        session.messages = vec![Message {
            id: "a".to_string(),
            sender: Sender::Counterpart,
            body: "hello".to_string(),
            attachment: None,
            kind: MessageKind::Text,
            timestamp: 1,
            status: MessageStatus::DeliveredUnread,
            status_event: None,
            tags: Vec::new(),
            actions: Vec::new(),
        }];
        session.touch_preview();
        session.recount_unread();
        session
    }

    #[test]
    fn test_snapshot_strips_message_bodies() {
        let dir = tempdir().unwrap();
        let snapshot = BackupSnapshot::new(dir.path(), 64 * 1024);

        snapshot.write(&[session("R-1"), session("R-2")]);
        let loaded = snapshot.read();

        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|s| s.messages.is_empty()));
        assert_eq!(loaded[0].unread_count, 1, "metadata survives");
        assert_eq!(loaded[0].last_message_preview, "hello");
    }

    #[test]
    fn test_over_quota_write_is_skipped() {
        let dir = tempdir().unwrap();
        let snapshot = BackupSnapshot::new(dir.path(), 8);

        snapshot.write(&[session("R-1")]);
        assert!(snapshot.read().is_empty(), "over-quota snapshot must not be written");
    }

    #[test]
    fn test_missing_snapshot_reads_empty() {
        let dir = tempdir().unwrap();
        let snapshot = BackupSnapshot::new(dir.path(), 64 * 1024);
        assert!(snapshot.read().is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_reads_empty() {
        let dir = tempdir().unwrap();
        let snapshot = BackupSnapshot::new(dir.path(), 64 * 1024);
        std::fs::write(dir.path().join("sessions.backup.json"), b"{nope").unwrap();
        assert!(snapshot.read().is_empty());
    }
}
