//! HTTP-01 challenge token store
//!
//! 💾 Shared between the certificate request executor, which registers and
//! withdraws tokens while an authorization is pending, and the HTTP
//! responder, which answers the authority's validation requests.

use parking_lot::RwLock;
use std::collections::HashMap;

/// URL prefix the authority requests HTTP-01 challenge responses under
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// 💾 In-memory map from challenge identifier to challenge token
///
/// Writes are synchronous, so a token is visible to the responder as soon
/// as [`set`](Self::set) returns.
#[derive(Debug, Default)]
pub struct ChallengeTokenStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl ChallengeTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the token for `identifier`
    pub fn set(&self, identifier: impl Into<String>, token: impl Into<String>) {
        let identifier = identifier.into();
        tracing::debug!("🚀 Challenge token set for {}", identifier);
        self.tokens.write().insert(identifier, token.into());
    }

    /// Remove the token for `identifier`, if any
    pub fn remove(&self, identifier: &str) {
        if self.tokens.write().remove(identifier).is_some() {
            tracing::debug!("🧹 Challenge token removed for {}", identifier);
        }
    }

    /// Resolve an inbound request path to its challenge token.
    ///
    /// Paths outside [`ACME_CHALLENGE_PREFIX`] are rejected before the map
    /// is consulted.
    pub fn lookup(&self, request_path: &str) -> Option<String> {
        let identifier = request_path.strip_prefix(ACME_CHALLENGE_PREFIX)?;
        if identifier.is_empty() {
            return None;
        }

        self.get(identifier)
    }

    /// Token registered under `identifier`
    pub fn get(&self, identifier: &str) -> Option<String> {
        self.tokens
            .read()
            .get(identifier)
            .filter(|token| !token.is_empty())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_and_lookup() {
        let store = ChallengeTokenStore::new();
        store.set("abc123", "abc123.thumbprint");

        assert_eq!(
            store.lookup("/.well-known/acme-challenge/abc123"),
            Some("abc123.thumbprint".to_string())
        );
        assert_eq!(store.lookup("/.well-known/acme-challenge/other"), None);
    }

    #[test]
    fn test_prefix_checked_first() {
        let store = ChallengeTokenStore::new();
        store.set("abc123", "token");

        // The identifier exists, but the path is not a challenge path
        assert_eq!(store.lookup("abc123"), None);
        assert_eq!(store.lookup("/abc123"), None);
        assert_eq!(store.lookup("/.well-known/abc123"), None);
        assert_eq!(store.lookup("/.well-known/acme-challengeabc123"), None);
        assert_eq!(store.lookup("/.WELL-KNOWN/acme-challenge/abc123"), None);
    }

    #[test]
    fn test_empty_identifier() {
        let store = ChallengeTokenStore::new();
        store.set("", "token");
        assert_eq!(store.lookup(ACME_CHALLENGE_PREFIX), None);
    }

    #[test]
    fn test_empty_token_is_not_found() {
        let store = ChallengeTokenStore::new();
        store.set("abc", "");
        assert_eq!(store.lookup("/.well-known/acme-challenge/abc"), None);
    }

    #[test]
    fn test_remove_wins_over_prior_sets() {
        let store = ChallengeTokenStore::new();
        store.set("abc", "one");
        store.set("abc", "two");
        assert_eq!(store.get("abc"), Some("two".to_string()));

        store.remove("abc");
        assert_eq!(store.lookup("/.well-known/acme-challenge/abc"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let store = ChallengeTokenStore::new();
        store.set("keep", "token");
        store.remove("missing");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_sessions() {
        let store = Arc::new(ChallengeTokenStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let id = format!("token-{}", i);
                    store.set(id.clone(), format!("{}.auth", id));
                    assert_eq!(
                        store.lookup(&format!("{}{}", ACME_CHALLENGE_PREFIX, id)),
                        Some(format!("{}.auth", id))
                    );
                    store.remove(&id);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(store.is_empty());
    }
}
