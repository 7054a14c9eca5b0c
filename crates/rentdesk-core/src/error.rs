use thiserror::Error;

/// Error taxonomy of the sync engine. Cancellation and authorization
/// failures are distinct conditions: the former is silently discarded by
/// callers, the latter is surfaced so the UI can prompt re-authentication.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A newer load superseded this one. Never logged as an error.
    #[error("load superseded by a newer one")]
    Cancelled,

    /// The remote rejected our credentials. Not retried automatically.
    #[error("authentication required")]
    Unauthorized,

    /// No local cache exists and every remote source failed.
    #[error("conversation {0} unavailable: no local cache and remote fetch failed")]
    Unavailable(String),

    /// Operation addressed a conversation the store does not know.
    #[error("unknown conversation {0}")]
    UnknownConversation(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Transient failures are degraded to an empty result by the store;
    /// authorization failures and cancellations are not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CoreError::Cancelled | CoreError::Unauthorized)
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
