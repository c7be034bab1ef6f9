//! OIDC discovery: fetching, validating and caching provider metadata.
//!
//! - [`DiscoveryClient`] fetches `{issuer}/.well-known/openid-configuration`
//!   and validates it. It never caches.
//! - [`DiscoveryCache`] keeps validated documents per issuer for a
//!   configurable TTL so that resolving a flow's server configuration does
//!   not hit the provider on every request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use url::Url;

use super::oidc::{InvalidDocument, OidcDiscoveryDocument};
use crate::config::DiscoveryConfig;
use crate::http::{HttpClient, TransportError};

const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

/// Errors that can occur while discovering a provider.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The issuer cannot be used for discovery (it must be `https`).
    #[error("Discovery precondition failed: {0}")]
    Precondition(String),

    /// The document was fetched but violates a protocol rule.
    #[error("Invalid discovery document: {0}")]
    Invalid(#[from] InvalidDocument),

    /// The document could not be fetched.
    #[error("Failed to fetch discovery document: {0}")]
    Transport(#[from] TransportError),

    /// The response body is not a JSON object.
    #[error("Failed to parse discovery document: {0}")]
    Parse(String),
}

/// Fetches and validates discovery documents.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    http: HttpClient,
}

impl DiscoveryClient {
    /// Creates a client over `http`.
    #[must_use]
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Fetches and validates the discovery document of `issuer`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the issuer is not `https` (plain `http` only when the client allows it)
    /// - the document cannot be fetched or is not JSON
    /// - the document fails [`OidcDiscoveryDocument::validate`]
    pub async fn fetch(&self, issuer: &Url) -> Result<OidcDiscoveryDocument, DiscoveryError> {
        let scheme_ok =
            issuer.scheme() == "https" || (issuer.scheme() == "http" && self.http.allow_http());
        if !scheme_ok {
            return Err(DiscoveryError::Precondition(format!(
                "issuer must use https: {issuer}"
            )));
        }

        let url = discovery_url(issuer);
        tracing::debug!(issuer = %issuer, "Fetching OIDC discovery document");

        let response = self
            .http
            .get(&url)
            .await
            .and_then(|r| r.error_for_status())
            .inspect_err(|e| {
                tracing::warn!(issuer = %issuer, error = %e, "Failed to fetch OIDC discovery");
            })?;

        let document: OidcDiscoveryDocument =
            serde_json::from_str(&response.body).map_err(|e| {
                tracing::warn!(issuer = %issuer, error = %e, "Failed to parse OIDC discovery");
                DiscoveryError::Parse(e.to_string())
            })?;

        document.validate(issuer).inspect_err(|e| {
            tracing::warn!(issuer = %issuer, reason = %e, "Rejected OIDC discovery document");
        })?;

        tracing::debug!(issuer = %issuer, "Validated OIDC discovery document");
        Ok(document)
    }
}

/// Builds `{issuer}/.well-known/openid-configuration`, tolerating a trailing
/// slash on the issuer.
#[must_use]
pub fn discovery_url(issuer: &Url) -> Url {
    let mut url = issuer.clone();
    let path = issuer.path().trim_end_matches('/');
    url.set_path(&format!("{path}/{WELL_KNOWN_PATH}"));
    url
}

struct CachedDiscovery {
    document: OidcDiscoveryDocument,
    fetched_at: Instant,
}

/// Per-issuer cache of validated discovery documents.
pub struct DiscoveryCache {
    client: DiscoveryClient,
    cache: Arc<RwLock<HashMap<String, CachedDiscovery>>>,
    config: DiscoveryConfig,
}

impl DiscoveryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(client: DiscoveryClient, config: DiscoveryConfig) -> Self {
        Self {
            client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Returns the cached document for `issuer`, fetching it on a miss or
    /// once the TTL has elapsed.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`DiscoveryClient::fetch`].
    pub async fn get(&self, issuer: &Url) -> Result<OidcDiscoveryDocument, DiscoveryError> {
        let key = normalize_issuer_key(issuer);

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key)
                && cached.fetched_at.elapsed() < self.config.ttl
            {
                tracing::trace!(issuer = %issuer, "Discovery cache hit");
                return Ok(cached.document.clone());
            }
        }

        self.refresh(issuer).await
    }

    /// Fetches a fresh document regardless of the cache state.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`DiscoveryClient::fetch`]. A failed refresh
    /// leaves any previous entry untouched.
    pub async fn refresh(&self, issuer: &Url) -> Result<OidcDiscoveryDocument, DiscoveryError> {
        let document = self.client.fetch(issuer).await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            normalize_issuer_key(issuer),
            CachedDiscovery {
                document: document.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(document)
    }

    /// Removes the entry for `issuer`.
    pub async fn invalidate(&self, issuer: &Url) {
        let mut cache = self.cache.write().await;
        cache.remove(&normalize_issuer_key(issuer));
        tracing::debug!(issuer = %issuer, "Invalidated discovery cache entry");
    }

    /// Drops expired entries.
    pub async fn cleanup(&self) {
        let mut cache = self.cache.write().await;
        let ttl = self.config.ttl;
        let before = cache.len();
        cache.retain(|_, v| v.fetched_at.elapsed() < ttl);
        let removed = before - cache.len();
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up expired discovery cache entries");
        }
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    /// Returns the number of entries in the cache.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Returns `true` if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

fn normalize_issuer_key(issuer: &Url) -> String {
    issuer.as_str().trim_end_matches('/').to_string()
}
