use std::sync::Arc;

use parking_lot::RwLock;

/// Authentication collaborator. The engine only consumes token queries;
/// unauthorized remote responses surface as [`crate::CoreError::Unauthorized`]
/// and are never retried automatically.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;

    fn is_authorized(&self) -> bool {
        self.bearer_token().is_some()
    }
}

/// Token held in memory, replaceable when the operator re-authenticates.
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            token: RwLock::new(token),
        })
    }

    pub fn replace(&self, token: Option<String>) {
        *self.token.write() = token;
    }
}

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token_replace() {
        let provider = StaticToken::new(None);
        assert!(!provider.is_authorized());

        provider.replace(Some("tok-1".to_string()));
        assert!(provider.is_authorized());
        assert_eq!(provider.bearer_token().as_deref(), Some("tok-1"));
    }
}
