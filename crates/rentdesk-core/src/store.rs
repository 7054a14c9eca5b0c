//! The public API of the sync engine: hydration, conversation loading with
//! race-safety, sending, read/unread transitions, archival and deletion.
//! The store exclusively owns the in-memory session list; the persistence
//! layer is a passive mirror updated after every mutation, and the
//! multiplexer feeds events back through [`SessionStore::apply_feed_event`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::advisor::{Advisor, Suggestion};
use crate::auth::TokenProvider;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::events::CoreEvent;
use crate::feed::mux::{self, ConnectivitySignal, MuxEvent, MuxHandle, MuxState};
use crate::feed::types::FeedEvent;
use crate::mapper;
use crate::merge::{merge_full, merge_incremental};
use crate::models::{
    ConversationSession, Counterpart, Message, MessageAction, ReservationSummary, Sender,
};
use crate::persist::{BackupSnapshot, SessionDb};
use crate::remote::gateway::GatewayClient;
use crate::remote::history::StatusLogClient;
use crate::remote::{FeedSnapshotSource, HistorySource, OutboundGateway};

/// How much transcript the advisor sees.
const ADVISOR_CONTEXT_MESSAGES: usize = 20;

struct Inner {
    sessions: HashMap<String, ConversationSession>,
    suggestions: HashMap<String, Suggestion>,
    /// Current load generation per conversation. A load commits only if its
    /// minted token still matches: last-load-wins, not last-completed-wins.
    load_tokens: HashMap<String, u64>,
    load_aborts: HashMap<String, CancellationToken>,
    next_load_token: u64,
    hydrated: bool,
}

pub struct SessionStore {
    config: CoreConfig,
    inner: Mutex<Inner>,
    db: SessionDb,
    backup: BackupSnapshot,
    history: Arc<dyn HistorySource>,
    feed: Arc<dyn FeedSnapshotSource>,
    outbound: Arc<dyn OutboundGateway>,
    advisor: Arc<dyn Advisor>,
    mux: Option<MuxHandle>,
    events_tx: UnboundedSender<CoreEvent>,
    events_rx: Mutex<Option<UnboundedReceiver<CoreEvent>>>,
}

impl SessionStore {
    /// Construct against the real remote services, spawning the multiplexer
    /// and the pump that feeds its events back into the merge path.
    pub fn open(
        config: CoreConfig,
        token: Arc<dyn TokenProvider>,
        advisor: Arc<dyn Advisor>,
    ) -> Result<Arc<Self>, CoreError> {
        let gateway = Arc::new(GatewayClient::new(config.gateway_url.clone(), token.clone()));
        let history = Arc::new(StatusLogClient::new(config.status_log_url.clone(), token));

        let (mux_tx, mux_rx) = mpsc::unbounded_channel();
        let mux = mux::spawn(gateway.clone(), mux_tx, config.max_topics);

        let store = Self::with_collaborators(
            config,
            history,
            gateway.clone(),
            gateway,
            advisor,
            Some(mux),
        )?;
        store.clone().spawn_event_pump(mux_rx);
        Ok(store)
    }

    /// Dependency-injected constructor. Tests and embedders wire their own
    /// collaborators here; with `mux = None` the store runs without a live
    /// connection.
    pub fn with_collaborators(
        config: CoreConfig,
        history: Arc<dyn HistorySource>,
        feed: Arc<dyn FeedSnapshotSource>,
        outbound: Arc<dyn OutboundGateway>,
        advisor: Arc<dyn Advisor>,
        mux: Option<MuxHandle>,
    ) -> Result<Arc<Self>, CoreError> {
        let db = SessionDb::open(&config.data_dir)?;
        let backup = BackupSnapshot::new(&config.data_dir, config.backup_max_bytes);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            config,
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                suggestions: HashMap::new(),
                load_tokens: HashMap::new(),
                load_aborts: HashMap::new(),
                next_load_token: 0,
                hydrated: false,
            }),
            db,
            backup,
            history,
            feed,
            outbound,
            advisor,
            mux,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }))
    }

    /// Hand out the events channel. Yields `None` after the first call.
    pub fn take_events(&self) -> Option<UnboundedReceiver<CoreEvent>> {
        self.events_rx.lock().take()
    }

    fn spawn_event_pump(self: Arc<Self>, mut rx: UnboundedReceiver<MuxEvent>) {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    MuxEvent::Message(topic, feed_event) => {
                        self.apply_feed_event(&topic, feed_event).await;
                    }
                    MuxEvent::State(state) => {
                        let _ = self.events_tx.send(CoreEvent::Connection(state));
                    }
                }
            }
        });
    }

    /// Sessions ordered most recently active first. Always clones; callers
    /// never hold references into the locked state.
    pub fn sessions(&self) -> Vec<ConversationSession> {
        let inner = self.inner.lock();
        let mut sessions: Vec<ConversationSession> = inner.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        sessions
    }

    pub fn session(&self, id: &str) -> Option<ConversationSession> {
        self.inner.lock().sessions.get(id).cloned()
    }

    pub fn suggestion(&self, id: &str) -> Option<Suggestion> {
        self.inner.lock().suggestions.get(id).cloned()
    }

    pub fn clear_suggestion(&self, id: &str) {
        self.inner.lock().suggestions.remove(id);
    }

    /// Load all persisted sessions into memory, exactly once per process
    /// lifetime. A failed primary load falls back to the backup snapshot,
    /// and a failed backup to an empty list - hydration never blocks the UI.
    pub async fn hydrate(&self) -> Result<(), CoreError> {
        {
            let mut inner = self.inner.lock();
            if inner.hydrated {
                return Ok(());
            }
            inner.hydrated = true;
        }

        let sessions = match self.db.load_all().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "primary store unavailable, cold-starting from backup snapshot");
                self.backup.read()
            }
        };

        let count = sessions.len();
        {
            let mut inner = self.inner.lock();
            for session in sessions {
                let _ = self
                    .events_tx
                    .send(CoreEvent::SessionUpdated(session.id.clone()));
                inner.sessions.insert(session.id.clone(), session);
            }
        }
        info!(count, "hydrated sessions");
        self.resubscribe();
        Ok(())
    }

    /// Create or refresh a conversation's identity fields when a reservation
    /// is opened in the console. Message state is untouched.
    pub async fn register_conversation(
        &self,
        id: &str,
        counterpart: Counterpart,
        summary: Option<ReservationSummary>,
    ) -> Result<(), CoreError> {
        let session = {
            let mut inner = self.inner.lock();
            let session = inner
                .sessions
                .entry(id.to_string())
                .or_insert_with(|| ConversationSession::new(id, Counterpart::unknown()));
            session.counterpart = counterpart;
            if summary.is_some() {
                session.summary = summary;
            }
            session.clone()
        };

        self.persist(&session).await;
        let _ = self.events_tx.send(CoreEvent::SessionUpdated(id.to_string()));
        self.resubscribe();
        Ok(())
    }

    /// Fetch remote history plus a feed snapshot, merge with the cached
    /// session, persist, and commit - but only if no newer load for the same
    /// conversation was started in the meantime.
    pub async fn load_conversation(&self, id: &str) -> Result<(), CoreError> {
        let (token, cancel) = {
            let mut inner = self.inner.lock();
            inner.next_load_token += 1;
            let token = inner.next_load_token;
            inner.load_tokens.insert(id.to_string(), token);
            // Starting a new load aborts the previous one for this slot.
            if let Some(previous) = inner.load_aborts.remove(id) {
                previous.cancel();
            }
            let cancel = CancellationToken::new();
            inner.load_aborts.insert(id.to_string(), cancel.clone());
            (token, cancel)
        };

        let fetches = async { tokio::join!(self.history.status_log(id), self.feed.poll(id)) };
        let (history_result, feed_result) = tokio::select! {
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            results = fetches => results,
        };

        let had_session = self.session(id).is_some();

        let (history, history_failed) = match history_result {
            Ok(records) => (records, false),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                debug!(id, error = %e, "status log unavailable, substituting empty history");
                (Vec::new(), true)
            }
        };
        let (feed_events, feed_failed) = match feed_result {
            Ok(events) => (events, false),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                debug!(id, error = %e, "feed snapshot unavailable, substituting empty batch");
                (Vec::new(), true)
            }
        };

        // Without any local cache there is nothing left to render from.
        if history_failed && feed_failed && !had_session {
            return Err(CoreError::Unavailable(id.to_string()));
        }

        let history_messages: Vec<Message> =
            history.iter().map(mapper::from_status_record).collect();
        let feed_messages: Vec<Message> = feed_events
            .iter()
            .filter_map(|event| mapper::from_feed_event(event, &self.config.identity))
            .collect();

        // Merge and commit in one critical section: the merge must read the
        // cached list that the replacement lands on, or a push event applied
        // between the two would be silently dropped. Commit only if no newer
        // load for this conversation has started; a superseded result is
        // discarded entirely, including its write.
        let committed = {
            let mut inner = self.inner.lock();
            if inner.load_tokens.get(id) != Some(&token) {
                None
            } else {
                let mut session = inner
                    .sessions
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| ConversationSession::new(id, Counterpart::unknown()));
                let merged = merge_full(&session.messages, history_messages, feed_messages);
                session.apply_messages(merged);
                inner.sessions.insert(id.to_string(), session.clone());
                inner.load_aborts.remove(id);
                Some(session)
            }
        };

        let Some(committed) = committed else {
            return Err(CoreError::Cancelled);
        };

        if let Err(e) = self.db.upsert(&committed).await {
            warn!(id, error = %e, "failed to persist merged conversation");
        }
        self.write_backup();
        let _ = self.events_tx.send(CoreEvent::SessionUpdated(id.to_string()));
        self.resubscribe();
        Ok(())
    }

    /// Optimistic text send: the pending message is appended and persisted
    /// synchronously with respect to other mutations, then the remote send
    /// is issued. A remote failure leaves the message in place - no retry
    /// queue, no rollback.
    pub async fn send_text(
        &self,
        id: &str,
        body: &str,
        tags: Vec<String>,
        actions: Vec<MessageAction>,
    ) -> Result<(), CoreError> {
        let message = mapper::local_text(body, tags.clone(), actions.clone(), now_ms());
        let session = self.append_local(id, message)?;
        self.persist(&session).await;
        let _ = self.events_tx.send(CoreEvent::SessionUpdated(id.to_string()));

        if let Err(e) = self.outbound.publish_text(id, body, &tags, &actions).await {
            warn!(id, error = %e, "outbound send failed, optimistic message left in place");
        }
        Ok(())
    }

    /// Optimistic attachment send.
    pub async fn send_attachment(
        &self,
        id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<(), CoreError> {
        let message = mapper::local_attachment(filename, now_ms());
        let session = self.append_local(id, message)?;
        self.persist(&session).await;
        let _ = self.events_tx.send(CoreEvent::SessionUpdated(id.to_string()));

        if let Err(e) = self.outbound.publish_attachment(id, filename, bytes).await {
            warn!(id, error = %e, "attachment upload failed, optimistic message left in place");
        }
        Ok(())
    }

    fn append_local(&self, id: &str, message: Message) -> Result<ConversationSession, CoreError> {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| CoreError::UnknownConversation(id.to_string()))?;
        session.messages.push(message);
        session.touch_preview();
        session.recount_unread();
        Ok(session.clone())
    }

    /// Flip every delivered-unread message to read and zero the counter.
    pub async fn mark_conversation_read(&self, id: &str) -> Result<(), CoreError> {
        let session = {
            let mut inner = self.inner.lock();
            let session = inner
                .sessions
                .get_mut(id)
                .ok_or_else(|| CoreError::UnknownConversation(id.to_string()))?;
            for message in &mut session.messages {
                message.mark_read();
            }
            session.recount_unread();
            session.clone()
        };

        self.persist(&session).await;
        let _ = self.events_tx.send(CoreEvent::SessionUpdated(id.to_string()));
        Ok(())
    }

    /// Full unread-reset, the one allowed backward transition: counterpart
    /// messages flip back to delivered-unread.
    pub async fn mark_conversation_unread(&self, id: &str) -> Result<(), CoreError> {
        let session = {
            let mut inner = self.inner.lock();
            let session = inner
                .sessions
                .get_mut(id)
                .ok_or_else(|| CoreError::UnknownConversation(id.to_string()))?;
            for message in session
                .messages
                .iter_mut()
                .filter(|m| m.sender == Sender::Counterpart)
            {
                message.reset_unread();
            }
            session.recount_unread();
            session.clone()
        };

        self.persist(&session).await;
        let _ = self.events_tx.send(CoreEvent::SessionUpdated(id.to_string()));
        Ok(())
    }

    /// Single-message read transition, decrementing the unread count by
    /// exactly one when the message was previously unread. Idempotent.
    pub async fn mark_message_read(&self, id: &str, message_id: &str) -> Result<(), CoreError> {
        let session = {
            let mut inner = self.inner.lock();
            let session = inner
                .sessions
                .get_mut(id)
                .ok_or_else(|| CoreError::UnknownConversation(id.to_string()))?;

            let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) else {
                debug!(id, message_id, "mark_message_read for unknown message");
                return Ok(());
            };
            let counted = message.counts_toward_unread();
            if !message.mark_read() {
                return Ok(());
            }
            if counted {
                session.unread_count = session.unread_count.saturating_sub(1);
            }
            session.clone()
        };

        self.persist(&session).await;
        let _ = self.events_tx.send(CoreEvent::SessionUpdated(id.to_string()));
        Ok(())
    }

    /// Toggle the archived flag. Archived conversations stay subscribed;
    /// only deletion drops the topic.
    pub async fn archive(&self, id: &str) -> Result<(), CoreError> {
        let session = {
            let mut inner = self.inner.lock();
            let session = inner
                .sessions
                .get_mut(id)
                .ok_or_else(|| CoreError::UnknownConversation(id.to_string()))?;
            session.archived = !session.archived;
            session.clone()
        };

        self.persist(&session).await;
        let _ = self.events_tx.send(CoreEvent::SessionUpdated(id.to_string()));
        Ok(())
    }

    /// Remove the conversation, its persisted record, and its feed topic.
    pub async fn delete(&self, id: &str) -> Result<(), CoreError> {
        {
            let mut inner = self.inner.lock();
            if inner.sessions.remove(id).is_none() {
                return Err(CoreError::UnknownConversation(id.to_string()));
            }
            inner.suggestions.remove(id);
            inner.load_tokens.remove(id);
            if let Some(cancel) = inner.load_aborts.remove(id) {
                cancel.cancel();
            }
        }

        if let Err(e) = self.db.remove(id).await {
            warn!(id, error = %e, "failed to remove persisted conversation");
        }
        self.write_backup();
        let _ = self.events_tx.send(CoreEvent::SessionRemoved(id.to_string()));
        self.resubscribe();
        Ok(())
    }

    /// Tear down the multiplexer and abort any in-flight loads. Used on
    /// app teardown.
    pub fn disconnect(&self) {
        {
            let mut inner = self.inner.lock();
            for (_, cancel) in inner.load_aborts.drain() {
                cancel.cancel();
            }
        }
        if let Some(mux) = &self.mux {
            mux.shutdown();
        }
        let _ = self.events_tx.send(CoreEvent::Connection(MuxState::Disconnected));
    }

    /// Forward an environment signal (visibility regained, network online)
    /// to the multiplexer's state machine.
    pub fn signal(&self, signal: ConnectivitySignal) {
        if let Some(mux) = &self.mux {
            mux.signal(signal);
        }
    }

    /// Merge one push event into its session. Events for unknown topics are
    /// dropped - push events alone never create sessions.
    pub async fn apply_feed_event(&self, topic: &str, event: FeedEvent) {
        let Some(message) = mapper::from_feed_event(&event, &self.config.identity) else {
            return;
        };
        let inbound = message.sender == Sender::Counterpart;

        let session = {
            let mut inner = self.inner.lock();
            let Some(session) = inner.sessions.get_mut(topic) else {
                debug!(topic, "dropping push event for unknown topic");
                return;
            };
            merge_incremental(&mut session.messages, vec![message]);
            session.touch_preview();
            session.recount_unread();
            session.clone()
        };

        self.persist(&session).await;
        let _ = self.events_tx.send(CoreEvent::SessionUpdated(topic.to_string()));

        if inbound {
            self.refresh_suggestion(topic, &session).await;
        }
    }

    async fn refresh_suggestion(&self, id: &str, session: &ConversationSession) {
        let start = session.messages.len().saturating_sub(ADVISOR_CONTEXT_MESSAGES);
        let status_tag = current_status_tag(session);

        if let Some(suggestion) = self
            .advisor
            .suggest(&session.messages[start..], &status_tag)
            .await
        {
            self.inner
                .lock()
                .suggestions
                .insert(id.to_string(), suggestion.clone());
            let _ = self.events_tx.send(CoreEvent::Suggestion {
                conversation_id: id.to_string(),
                suggestion,
            });
        }
    }

    /// Point the multiplexer at the full set of non-deleted topics, most
    /// recently active first.
    fn resubscribe(&self) {
        let Some(mux) = &self.mux else { return };
        let topics: Vec<String> = self.sessions().into_iter().map(|s| s.id).collect();
        mux.set_topics(topics);
    }

    async fn persist(&self, session: &ConversationSession) {
        if let Err(e) = self.db.upsert(session).await {
            warn!(id = session.id.as_str(), error = %e, "primary store write failed");
        }
        self.write_backup();
    }

    fn write_backup(&self) {
        self.backup.write(&self.sessions());
    }
}

/// The reservation's current workflow tag: the newest system status event,
/// else the denormalized summary, else unknown.
fn current_status_tag(session: &ConversationSession) -> String {
    session
        .messages
        .iter()
        .rev()
        .find_map(|m| m.status_event.clone())
        .or_else(|| session.summary.as_ref().map(|s| s.status.clone()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
