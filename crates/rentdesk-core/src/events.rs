use crate::advisor::Suggestion;
use crate::feed::mux::MuxState;

/// Notifications the store emits for UI consumers. Drained through the
/// events channel handed out by [`crate::store::SessionStore::take_events`].
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// In-memory and persisted state for this conversation changed.
    SessionUpdated(String),
    /// The conversation was deleted, persisted record included.
    SessionRemoved(String),
    /// The advisor produced a new suggestion, superseding the previous one.
    Suggestion {
        conversation_id: String,
        suggestion: Suggestion,
    },
    /// Multiplexer connection state changed.
    Connection(MuxState),
}
