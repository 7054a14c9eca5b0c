use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::warn;

use crate::error::CoreError;
use crate::models::ConversationSession;

/// Primary persistence tier: one record per conversation, keyed by
/// conversation id, storing the full session including message bodies.
/// Writes run inside transactions, bridged to async via `spawn_blocking`.
pub struct SessionDb {
    conn: Arc<Mutex<Connection>>,
}

impl SessionDb {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, CoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| CoreError::Internal(anyhow!(e)))?;

        let conn = Connection::open(dir.join("sessions.db"))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                record TEXT NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn upsert(&self, session: &ConversationSession) -> Result<(), CoreError> {
        let id = session.id.clone();
        let record = serde_json::to_string(session)?;
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<(), rusqlite::Error> {
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO sessions (id, record) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET record = excluded.record",
                params![id, record],
            )?;
            tx.commit()
        })
        .await
        .map_err(|e| CoreError::Internal(anyhow!(e)))??;

        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<(), CoreError> {
        let id = id.to_string();
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<(), rusqlite::Error> {
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            tx.commit()
        })
        .await
        .map_err(|e| CoreError::Internal(anyhow!(e)))??;

        Ok(())
    }

    /// Load every persisted session. A row that fails to deserialize is
    /// skipped with a warning rather than failing hydration.
    pub async fn load_all(&self) -> Result<Vec<ConversationSession>, CoreError> {
        let conn = self.conn.clone();

        let records: Vec<(String, String)> =
            tokio::task::spawn_blocking(move || -> Result<Vec<(String, String)>, rusqlite::Error> {
                let conn = conn.lock();
                let mut stmt = conn.prepare("SELECT id, record FROM sessions")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect()
            })
            .await
            .map_err(|e| CoreError::Internal(anyhow!(e)))??;

        let mut sessions = Vec::with_capacity(records.len());
        for (id, record) in records {
            match serde_json::from_str::<ConversationSession>(&record) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(id, error = %e, "skipping undecodable session record"),
            }
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Counterpart, Message, MessageKind, MessageStatus, Sender,
    };
    use tempfile::tempdir;

    fn session_with_messages(id: &str) -> ConversationSession {
        let mut session = ConversationSession::new(id, Counterpart::unknown());
        session.messages = vec![
            Message {
                id: "a".to_string(),
                sender: Sender::Counterpart,
                body: "Is the van available?".to_string(),
                attachment: None,
                kind: MessageKind::Text,
                timestamp: 1_700_000_000_000,
                status: MessageStatus::DeliveredRead,
                status_event: None,
                tags: Vec::new(),
                actions: Vec::new(),
            },
            Message {
                id: "b".to_string(),
                sender: Sender::Operator,
                body: "It is".to_string(),
                attachment: None,
                kind: MessageKind::Text,
                timestamp: 1_700_000_060_000,
                status: MessageStatus::PendingSend,
                status_event: None,
                tags: Vec::new(),
                actions: Vec::new(),
            },
        ];
        session.touch_preview();
        session.recount_unread();
        session
    }

    #[tokio::test]
    async fn test_round_trip_preserves_statuses() {
        let dir = tempdir().unwrap();
        let db = SessionDb::open(dir.path()).unwrap();

        let session = session_with_messages("R-100");
        db.upsert(&session).await.unwrap();

        // Simulated cold start: a fresh handle over the same file.
        drop(db);
        let db = SessionDb::open(dir.path()).unwrap();
        let loaded = db.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], session, "reload must reproduce the identical session");
        assert_eq!(loaded[0].messages[0].status, MessageStatus::DeliveredRead);
        assert_eq!(loaded[0].messages[1].status, MessageStatus::PendingSend);
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_record() {
        let dir = tempdir().unwrap();
        let db = SessionDb::open(dir.path()).unwrap();

        let mut session = session_with_messages("R-100");
        db.upsert(&session).await.unwrap();
        session.archived = true;
        db.upsert(&session).await.unwrap();

        let loaded = db.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].archived);
    }

    #[tokio::test]
    async fn test_remove_deletes_record() {
        let dir = tempdir().unwrap();
        let db = SessionDb::open(dir.path()).unwrap();

        db.upsert(&session_with_messages("R-100")).await.unwrap();
        db.upsert(&session_with_messages("R-101")).await.unwrap();
        db.remove("R-100").await.unwrap();

        let loaded = db.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "R-101");
    }
}
