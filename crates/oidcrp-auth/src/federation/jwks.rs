//! Signing key resolution from provider JWKS endpoints.
//!
//! [`KeyResolverRegistry`] owns one [`JwksResolver`] per JWKS URI. Resolvers
//! are created on first use and shared by every validation against that
//! provider. Each resolver caches the parsed key set:
//!
//! - the TTL follows `Cache-Control: max-age`, clamped to the configured bounds
//! - a `kid` that is not in the cached set triggers one refetch, so a
//!   provider rotating its keys is picked up without a restart
//! - concurrent refetches of the same URI collapse into a single request

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::config::JwksConfig;
use crate::http::{HttpClient, HttpResponse, TransportError};

/// Errors that can occur during JWKS operations.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// The JWKS endpoint could not be reached.
    #[error("Failed to fetch JWKS: {0}")]
    Transport(#[from] TransportError),

    /// The JWKS response is not a JSON Web Key Set.
    #[error("Failed to parse JWKS: {0}")]
    Parse(String),

    /// No key carries the requested key id.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The token names no key id and the set holds several signing keys.
    #[error("Token has no key id and the JWKS holds {0} signing keys")]
    AmbiguousKey(usize),

    /// The key could not be converted to a decoding key.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// A key ready for signature verification.
#[derive(Clone)]
pub struct ResolvedKey {
    /// Key id, if the JWK declares one.
    pub kid: Option<String>,
    /// The verification key.
    pub key: DecodingKey,
    /// Algorithm pinned by the JWK `alg` member.
    pub algorithm: Option<Algorithm>,
}

impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

/// Key resolver bound to one JWKS URI.
pub struct JwksResolver {
    uri: Url,
    http: HttpClient,
    config: JwksConfig,
    cached: RwLock<Option<CachedJwks>>,
    generation: AtomicU64,
    fetch_lock: Mutex<()>,
}

impl JwksResolver {
    /// Creates a resolver for `uri`. Nothing is fetched until the first lookup.
    #[must_use]
    pub fn new(uri: Url, http: HttpClient, config: JwksConfig) -> Self {
        Self {
            uri,
            http,
            config,
            cached: RwLock::new(None),
            generation: AtomicU64::new(0),
            fetch_lock: Mutex::new(()),
        }
    }

    /// The JWKS URI this resolver serves.
    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Resolves the key for `kid`.
    ///
    /// Without a `kid` the set must contain exactly one signing key.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::KeyNotFound` if the key is absent even after a
    /// refetch, `JwksError::AmbiguousKey` for a missing `kid` with several
    /// candidates, and transport or parse errors from the fetch.
    pub async fn resolve(&self, kid: Option<&str>) -> Result<ResolvedKey, JwksError> {
        let seen_generation = self.generation.load(Ordering::Acquire);

        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref()
                && Instant::now() < entry.expires_at
            {
                match select_key(&entry.jwks, kid) {
                    Err(JwksError::KeyNotFound(_)) => {
                        tracing::debug!(uri = %self.uri, kid = ?kid, "Unknown kid, refetching JWKS");
                    }
                    other => return other,
                }
            }
        }

        let _guard = self.fetch_lock.lock().await;

        // Another task may have refetched while this one waited for the lock.
        if self.generation.load(Ordering::Acquire) != seen_generation {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                return select_key(&entry.jwks, kid);
            }
        }

        let (jwks, ttl) = self.fetch().await?;
        let result = select_key(&jwks, kid);
        self.store(jwks, ttl).await;
        result
    }

    /// Fetches the key set and replaces the cached one.
    ///
    /// # Errors
    ///
    /// Returns transport or parse errors from the fetch.
    pub async fn refresh(&self) -> Result<(), JwksError> {
        let _guard = self.fetch_lock.lock().await;
        let (jwks, ttl) = self.fetch().await?;
        self.store(jwks, ttl).await;
        Ok(())
    }

    /// Drops the cached key set.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        tracing::debug!(uri = %self.uri, "Invalidated JWKS cache");
    }

    async fn fetch(&self) -> Result<(JwkSet, Duration), JwksError> {
        tracing::debug!(uri = %self.uri, "Fetching JWKS");
        let response = self
            .http
            .get(&self.uri)
            .await
            .and_then(HttpResponse::error_for_status)
            .inspect_err(|e| tracing::warn!(uri = %self.uri, error = %e, "Failed to fetch JWKS"))?;

        let ttl = self.ttl_for(&response);
        let jwks: JwkSet = serde_json::from_str(&response.body).map_err(|e| {
            tracing::warn!(uri = %self.uri, error = %e, "Failed to parse JWKS");
            JwksError::Parse(e.to_string())
        })?;

        tracing::debug!(uri = %self.uri, keys = jwks.keys.len(), ttl = ?ttl, "Fetched JWKS");
        Ok((jwks, ttl))
    }

    async fn store(&self, jwks: JwkSet, ttl: Duration) {
        *self.cached.write().await = Some(CachedJwks {
            jwks,
            expires_at: Instant::now() + ttl,
        });
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// TTL from `Cache-Control: max-age`, clamped to `[min_ttl, max_ttl]`.
    fn ttl_for(&self, response: &HttpResponse) -> Duration {
        let ttl = response
            .header("cache-control")
            .and_then(parse_max_age)
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl);

        ttl.min(self.config.max_ttl).max(self.config.min_ttl)
    }
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        directive
            .trim()
            .strip_prefix("max-age=")
            .and_then(|v| v.parse::<u64>().ok())
    })
}

fn select_key(jwks: &JwkSet, kid: Option<&str>) -> Result<ResolvedKey, JwksError> {
    let jwk = match kid {
        Some(kid) => jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
            .ok_or_else(|| JwksError::KeyNotFound(kid.to_string()))?,
        None => {
            let signing: Vec<&Jwk> = jwks
                .keys
                .iter()
                .filter(|k| !matches!(k.common.public_key_use, Some(PublicKeyUse::Encryption)))
                .collect();
            match signing.as_slice() {
                [only] => *only,
                [] => return Err(JwksError::KeyNotFound("<none>".to_string())),
                many => return Err(JwksError::AmbiguousKey(many.len())),
            }
        }
    };

    let key = DecodingKey::from_jwk(jwk).map_err(|e| JwksError::InvalidKey(e.to_string()))?;
    Ok(ResolvedKey {
        kid: jwk.common.key_id.clone(),
        key,
        algorithm: jwk_algorithm(jwk),
    })
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}

/// Process-wide map of JWKS URI to resolver.
pub struct KeyResolverRegistry {
    http: HttpClient,
    config: JwksConfig,
    resolvers: DashMap<String, Arc<JwksResolver>>,
}

impl KeyResolverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(http: HttpClient, config: JwksConfig) -> Self {
        Self {
            http,
            config,
            resolvers: DashMap::new(),
        }
    }

    /// Returns the resolver for `uri`, creating it on first use. Concurrent
    /// callers for the same URI always receive the same instance.
    #[must_use]
    pub fn resolver(&self, uri: &Url) -> Arc<JwksResolver> {
        self.resolvers
            .entry(normalize_uri(uri))
            .or_insert_with(|| {
                tracing::debug!(uri = %uri, "Creating JWKS resolver");
                Arc::new(JwksResolver::new(
                    uri.clone(),
                    self.http.clone(),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    /// Resolves `kid` against the key set published at `uri`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`JwksResolver::resolve`].
    pub async fn resolve(&self, uri: &Url, kid: Option<&str>) -> Result<ResolvedKey, JwksError> {
        self.resolver(uri).resolve(kid).await
    }

    /// Drops the cached key set for `uri`, keeping its resolver.
    pub async fn invalidate(&self, uri: &Url) {
        let resolver = self
            .resolvers
            .get(&normalize_uri(uri))
            .map(|r| Arc::clone(r.value()));
        if let Some(resolver) = resolver {
            resolver.invalidate().await;
        }
    }

    /// Number of resolvers created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Returns `true` if no resolver has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

fn normalize_uri(uri: &Url) -> String {
    uri.as_str().trim_end_matches('/').to_string()
}
