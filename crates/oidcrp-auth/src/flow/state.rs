//! Per-session authorization flow state.
//!
//! A [`FlowState`] is created when the authorization redirect is issued and
//! consumed when the callback comes back. It lives in a [`FlowStateStore`]
//! under the browser session id and a key namespaced by handler name, so
//! several handlers can run flows in the same session without collision.
//!
//! # Security Considerations
//!
//! - Never log `state`, `nonce` or `code_verifier` values
//! - A state is single use: the controller removes it once the callback is handled

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::FlowStateConfig;
use crate::error::RpResult;

const KEY_PREFIX: &str = "oauth2";

/// Values bound to one authorization round trip.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowState {
    /// CSRF token echoed back by the provider.
    pub state: String,
    /// Replay-protection value expected in the ID Token.
    pub nonce: String,
    /// PKCE verifier, present when the client uses PKCE.
    pub code_verifier: Option<String>,
    /// The exact `redirect_uri` sent in the authorization request.
    pub redirect_uri: String,
    /// Data client selected when the flow started.
    pub data_client: Option<String>,
}

impl FlowState {
    /// Creates a state with fresh random `state` and `nonce` values.
    #[must_use]
    pub fn generate(redirect_uri: impl Into<String>) -> Self {
        Self {
            state: random_token(),
            nonce: random_token(),
            code_verifier: None,
            redirect_uri: redirect_uri.into(),
            data_client: None,
        }
    }

    /// Sets the PKCE verifier.
    #[must_use]
    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    /// Sets the data client name.
    #[must_use]
    pub fn with_data_client(mut self, name: Option<String>) -> Self {
        self.data_client = name;
        self
    }
}

impl std::fmt::Debug for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowState")
            .field("state", &"[REDACTED]")
            .field("nonce", &"[REDACTED]")
            .field("code_verifier", &self.code_verifier.as_ref().map(|_| "[REDACTED]"))
            .field("redirect_uri", &self.redirect_uri)
            .field("data_client", &self.data_client)
            .finish()
    }
}

/// 32 random bytes, base64url without padding.
#[must_use]
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Store key for the flow of `handler_name` (`oauth2` or `oauth2.<name>`).
#[must_use]
pub fn flow_key(handler_name: Option<&str>) -> String {
    match handler_name {
        Some(name) if !name.is_empty() => format!("{KEY_PREFIX}.{name}"),
        _ => KEY_PREFIX.to_string(),
    }
}

/// Storage for [`FlowState`] values, keyed by session id and flow key.
///
/// Hosting integrations back this with their session mechanism;
/// [`InMemoryFlowStateStore`] serves single-process deployments and tests.
#[async_trait]
pub trait FlowStateStore: Send + Sync {
    /// Loads the state stored under `key` for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `RpError::Storage` if the backend is unavailable.
    async fn get(&self, session_id: &str, key: &str) -> RpResult<Option<FlowState>>;

    /// Stores `state`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `RpError::Storage` if the backend is unavailable.
    async fn set(&self, session_id: &str, key: &str, state: FlowState) -> RpResult<()>;

    /// Removes and returns the stored state.
    ///
    /// # Errors
    ///
    /// Returns `RpError::Storage` if the backend is unavailable.
    async fn remove(&self, session_id: &str, key: &str) -> RpResult<Option<FlowState>>;
}

/// Process-local [`FlowStateStore`].
///
/// Entries expire `ttl` after they were stored; expired entries read as
/// absent. Every [`SWEEP_INTERVAL`] writes the whole map is swept, so
/// abandoned flows do not accumulate even if [`cleanup`](Self::cleanup) is
/// never called.
#[derive(Debug)]
pub struct InMemoryFlowStateStore {
    entries: DashMap<(String, String), StoredFlowState>,
    ttl: Duration,
    writes: AtomicU64,
}

/// Writes between two sweeps of expired entries.
pub const SWEEP_INTERVAL: u64 = 256;

#[derive(Debug)]
struct StoredFlowState {
    state: FlowState,
    stored_at: Instant,
}

impl StoredFlowState {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() >= ttl
    }
}

impl Default for InMemoryFlowStateStore {
    fn default() -> Self {
        Self::from_config(&FlowStateConfig::default())
    }
}

impl InMemoryFlowStateStore {
    /// Creates a store with the default TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_config(config: &FlowStateConfig) -> Self {
        Self::with_ttl(config.ttl)
    }

    /// Creates a store whose entries live for `ttl`.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            writes: AtomicU64::new(0),
        }
    }

    /// Number of stored flow states, expired ones included until swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads an entry regardless of its age.
    #[cfg(test)]
    pub(crate) fn peek(&self, session_id: &str, key: &str) -> Option<FlowState> {
        self.entries
            .get(&(session_id.to_string(), key.to_string()))
            .map(|entry| entry.state.clone())
    }

    /// Drops expired entries and returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(self.ttl));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up expired flow states");
        }
        removed
    }
}

#[async_trait]
impl FlowStateStore for InMemoryFlowStateStore {
    async fn get(&self, session_id: &str, key: &str) -> RpResult<Option<FlowState>> {
        let id = (session_id.to_string(), key.to_string());
        let found = self
            .entries
            .get(&id)
            .map(|entry| (!entry.is_expired(self.ttl)).then(|| entry.state.clone()));
        match found {
            Some(Some(state)) => Ok(Some(state)),
            Some(None) => {
                self.entries
                    .remove_if(&id, |_, entry| entry.is_expired(self.ttl));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, session_id: &str, key: &str, state: FlowState) -> RpResult<()> {
        self.entries.insert(
            (session_id.to_string(), key.to_string()),
            StoredFlowState {
                state,
                stored_at: Instant::now(),
            },
        );
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            self.cleanup();
        }
        Ok(())
    }

    async fn remove(&self, session_id: &str, key: &str) -> RpResult<Option<FlowState>> {
        Ok(self
            .entries
            .remove(&(session_id.to_string(), key.to_string()))
            .filter(|(_, entry)| !entry.is_expired(self.ttl))
            .map(|(_, entry)| entry.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_token_shape() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), 43);
        assert!(!a.contains('='));
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_flow_key() {
        assert_eq!(flow_key(None), "oauth2");
        assert_eq!(flow_key(Some("")), "oauth2");
        assert_eq!(flow_key(Some("franceconnect")), "oauth2.franceconnect");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let state = FlowState::generate("https://rp.example.com/cb").with_code_verifier("v");
        let debug = format!("{state:?}");
        assert!(!debug.contains(&state.state));
        assert!(!debug.contains(&state.nonce));
        assert!(debug.contains("https://rp.example.com/cb"));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryFlowStateStore::new();
        let state = FlowState::generate("https://rp.example.com/cb");

        store.set("s1", "oauth2", state.clone()).await.unwrap();
        assert_eq!(store.get("s1", "oauth2").await.unwrap(), Some(state.clone()));
        assert_eq!(store.get("s2", "oauth2").await.unwrap(), None);
        assert_eq!(store.get("s1", "oauth2.other").await.unwrap(), None);

        assert_eq!(store.remove("s1", "oauth2").await.unwrap(), Some(state));
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_overwrites_per_key() {
        use tokio_test::block_on;

        let store = InMemoryFlowStateStore::new();
        let first = FlowState::generate("https://rp.example.com/cb");
        let second = FlowState::generate("https://rp.example.com/cb");

        block_on(store.set("s1", "oauth2", first)).unwrap();
        block_on(store.set("s1", "oauth2", second.clone())).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(block_on(store.get("s1", "oauth2")).unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_expired_state_reads_as_absent() {
        let store = InMemoryFlowStateStore::with_ttl(Duration::ZERO);
        let state = FlowState::generate("https://rp.example.com/cb");

        store.set("s1", "oauth2", state).await.unwrap();
        assert_eq!(store.get("s1", "oauth2").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_drops_only_expired() {
        let live = InMemoryFlowStateStore::with_ttl(Duration::from_secs(600));
        live.set("s1", "oauth2", FlowState::generate("https://rp.example.com/cb"))
            .await
            .unwrap();
        assert_eq!(live.cleanup(), 0);
        assert_eq!(live.len(), 1);

        let stale = InMemoryFlowStateStore::with_ttl(Duration::ZERO);
        for i in 0..10 {
            stale
                .set(&format!("s{i}"), "oauth2", FlowState::generate("https://rp.example.com/cb"))
                .await
                .unwrap();
        }
        assert_eq!(stale.cleanup(), 10);
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_writes_sweep_abandoned_flows() {
        let store = InMemoryFlowStateStore::with_ttl(Duration::ZERO);
        for i in 0..(SWEEP_INTERVAL * 4) {
            store
                .set(&format!("anon-{i}"), "oauth2", FlowState::generate("https://rp.example.com/cb"))
                .await
                .unwrap();
        }
        assert!(store.len() < SWEEP_INTERVAL as usize);
    }
}
