//! Client registration and provider endpoint configuration.
//!
//! A provider is described either statically (every endpoint listed) or by
//! its issuer with `discovery = true`, in which case absent values are
//! filled from the discovery document. [`EffectiveServerConfig::resolve`]
//! merges the two once per flow.
//!
//! # Example
//!
//! ```
//! use oidcrp_auth::federation::provider::{ClientConfig, ServerConfig};
//! use url::Url;
//!
//! let client = ClientConfig::new("abc")
//!     .with_client_secret("s3cr3t")
//!     .with_scopes(["openid", "profile"])
//!     .with_pkce(true);
//!
//! let server = ServerConfig::discovered(Url::parse("https://idp.example.com").unwrap());
//! assert!(client.is_confidential());
//! assert!(server.discovery);
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use url::Url;

use super::discovery::DiscoveryCache;
use super::oidc::OidcDiscoveryDocument;
use crate::config::ConfigError;
use crate::error::{RpError, RpResult};

/// Client registration at a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// OAuth client identifier.
    pub client_id: String,

    /// Client secret. Required unless `public`; also the HMAC key for
    /// HS-signed ID Tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Redirect URI registered at the provider. Derived from the callback
    /// configuration when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<Url>,

    /// Requested scopes (default: `openid`).
    #[serde(default = "default_scopes")]
    pub scopes: BTreeSet<String>,

    /// Requested authentication context classes, in preference order.
    #[serde(default, skip_serializing_if = "IndexSet::is_empty")]
    pub acr_values: IndexSet<String>,

    /// Public clients never send a secret.
    #[serde(default)]
    pub public: bool,

    /// Send a PKCE challenge with the authorization request.
    #[serde(default)]
    pub pkce: bool,
}

fn default_scopes() -> BTreeSet<String> {
    BTreeSet::from(["openid".to_string()])
}

fn default_true() -> bool {
    true
}

impl ClientConfig {
    /// Creates a confidential client requesting `openid`.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: None,
            scopes: default_scopes(),
            acr_values: IndexSet::new(),
            public: false,
            pkce: false,
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: Url) -> Self {
        self.redirect_uri = Some(uri);
        self
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the requested ACR values.
    #[must_use]
    pub fn with_acr_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acr_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the client public.
    #[must_use]
    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    /// Enables PKCE.
    #[must_use]
    pub fn with_pkce(mut self, pkce: bool) -> Self {
        self.pkce = pkce;
        self
    }

    /// Returns `true` for a client that authenticates with a secret.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        !self.public
    }

    /// The secret to send to the token endpoint, `None` for public clients.
    #[must_use]
    pub fn secret_for_token_request(&self) -> Option<&str> {
        if self.public {
            None
        } else {
            self.client_secret.as_deref()
        }
    }

    /// Scopes joined with spaces, the form-encoded wire shape being `+`-joined.
    #[must_use]
    pub fn scope_param(&self) -> String {
        self.scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }

    /// ACR values joined with spaces, `None` when empty.
    #[must_use]
    pub fn acr_param(&self) -> Option<String> {
        if self.acr_values.is_empty() {
            None
        } else {
            Some(
                self.acr_values
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client.client_id".to_string()));
        }
        if !self.public && self.client_secret.is_none() {
            return Err(ConfigError::Missing(
                "client.client_secret (required for confidential clients)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Provider endpoints, static or discovery-backed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Issuer identifier. Required when `discovery` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<Url>,

    /// Fill absent endpoints from the issuer's discovery document.
    #[serde(default)]
    pub discovery: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<Url>,

    /// When set, ID Token keys are resolved here by `kid`; otherwise the
    /// client secret is the HMAC key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_endpoint: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<Url>,

    /// Validate ID Tokens returned by the token endpoint. Always on for
    /// discovery-backed providers.
    #[serde(default = "default_true")]
    pub enable_jwt_validation: bool,

    /// Accepted ID Token signing algorithms. An empty list means ID Tokens
    /// must be unsigned. When absent, discovery-backed providers use the
    /// advertised algorithms and static ones fall back to an empty list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_algorithms: Option<Vec<String>>,
}

impl ServerConfig {
    /// A static provider with the two endpoints every flow needs.
    #[must_use]
    pub fn with_endpoints(authorization_endpoint: Url, token_endpoint: Url) -> Self {
        Self {
            issuer: None,
            discovery: false,
            authorization_endpoint: Some(authorization_endpoint),
            token_endpoint: Some(token_endpoint),
            end_session_endpoint: None,
            jwks_endpoint: None,
            userinfo_endpoint: None,
            enable_jwt_validation: true,
            signing_algorithms: None,
        }
    }

    /// A provider resolved through discovery of `issuer`.
    #[must_use]
    pub fn discovered(issuer: Url) -> Self {
        Self {
            issuer: Some(issuer),
            discovery: true,
            authorization_endpoint: None,
            token_endpoint: None,
            end_session_endpoint: None,
            jwks_endpoint: None,
            userinfo_endpoint: None,
            enable_jwt_validation: true,
            signing_algorithms: None,
        }
    }

    /// Sets the issuer.
    #[must_use]
    pub fn with_issuer(mut self, issuer: Url) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Sets the JWKS endpoint.
    #[must_use]
    pub fn with_jwks_endpoint(mut self, uri: Url) -> Self {
        self.jwks_endpoint = Some(uri);
        self
    }

    /// Sets the end-session endpoint.
    #[must_use]
    pub fn with_end_session_endpoint(mut self, uri: Url) -> Self {
        self.end_session_endpoint = Some(uri);
        self
    }

    /// Sets the userinfo endpoint.
    #[must_use]
    pub fn with_userinfo_endpoint(mut self, uri: Url) -> Self {
        self.userinfo_endpoint = Some(uri);
        self
    }

    /// Sets the accepted signing algorithms.
    #[must_use]
    pub fn with_signing_algorithms<I, S>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signing_algorithms = Some(algorithms.into_iter().map(Into::into).collect());
        self
    }

    /// Enables or disables ID Token validation.
    #[must_use]
    pub fn with_jwt_validation(mut self, enabled: bool) -> Self {
        self.enable_jwt_validation = enabled;
        self
    }

    pub(crate) fn validate(&self, allow_http: bool) -> Result<(), ConfigError> {
        if self.discovery {
            let issuer = self
                .issuer
                .as_ref()
                .ok_or_else(|| ConfigError::Missing("server.issuer".to_string()))?;
            if issuer.scheme() != "https" && !allow_http {
                return Err(ConfigError::InvalidValue(format!(
                    "discovery issuer must use https: {issuer}"
                )));
            }
        } else {
            if self.authorization_endpoint.is_none() {
                return Err(ConfigError::Missing(
                    "server.authorization_endpoint".to_string(),
                ));
            }
            if self.token_endpoint.is_none() {
                return Err(ConfigError::Missing("server.token_endpoint".to_string()));
            }
        }
        Ok(())
    }
}

/// Server configuration with every fallback applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveServerConfig {
    pub issuer: Option<Url>,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub end_session_endpoint: Option<Url>,
    pub jwks_endpoint: Option<Url>,
    pub userinfo_endpoint: Option<Url>,
    pub enable_jwt_validation: bool,
    /// Accepted ID Token signing algorithms; empty means unsigned tokens.
    pub signing_algorithms: Vec<String>,
}

impl EffectiveServerConfig {
    /// Merges static values with a discovery document. Static values win.
    ///
    /// # Errors
    ///
    /// Returns `RpError::Config` if the authorization or token endpoint is
    /// known from neither source, or a discovered URL does not parse.
    pub fn resolve(
        server: &ServerConfig,
        discovered: Option<&OidcDiscoveryDocument>,
    ) -> RpResult<Self> {
        let pick = |explicit: &Option<Url>, found: Option<&String>, name: &str| {
            match (explicit, found) {
                (Some(url), _) => Ok(Some(url.clone())),
                (None, Some(value)) => Url::parse(value).map(Some).map_err(|e| {
                    RpError::Config(format!("discovered {name} is not a valid URL: {e}"))
                }),
                (None, None) => Ok(None),
            }
        };

        let doc = discovered;
        let issuer = pick(&server.issuer, doc.and_then(|d| d.issuer.as_ref()), "issuer")?;
        let authorization_endpoint = pick(
            &server.authorization_endpoint,
            doc.and_then(|d| d.authorization_endpoint.as_ref()),
            "authorization_endpoint",
        )?
        .ok_or_else(|| RpError::Config("authorization endpoint is not configured".to_string()))?;
        let token_endpoint = pick(
            &server.token_endpoint,
            doc.and_then(|d| d.token_endpoint.as_ref()),
            "token_endpoint",
        )?
        .ok_or_else(|| RpError::Config("token endpoint is not configured".to_string()))?;
        let end_session_endpoint = pick(
            &server.end_session_endpoint,
            doc.and_then(|d| d.end_session_endpoint.as_ref()),
            "end_session_endpoint",
        )?;
        let jwks_endpoint = pick(
            &server.jwks_endpoint,
            doc.and_then(|d| d.jwks_uri.as_ref()),
            "jwks_uri",
        )?;
        let userinfo_endpoint = pick(
            &server.userinfo_endpoint,
            doc.and_then(|d| d.userinfo_endpoint.as_ref()),
            "userinfo_endpoint",
        )?;

        let signing_algorithms = server
            .signing_algorithms
            .clone()
            .or_else(|| doc.and_then(|d| d.id_token_signing_alg_values_supported.clone()))
            .unwrap_or_default();

        Ok(Self {
            issuer,
            authorization_endpoint,
            token_endpoint,
            end_session_endpoint,
            jwks_endpoint,
            userinfo_endpoint,
            enable_jwt_validation: server.discovery || server.enable_jwt_validation,
            signing_algorithms,
        })
    }
}

/// Resolves [`ServerConfig`]s, consulting the shared discovery cache for
/// discovery-backed providers.
#[derive(Clone)]
pub struct ServerConfigResolver {
    discovery: Arc<DiscoveryCache>,
}

impl ServerConfigResolver {
    /// Creates a resolver over `discovery`.
    #[must_use]
    pub fn new(discovery: Arc<DiscoveryCache>) -> Self {
        Self { discovery }
    }

    /// Computes the effective configuration for one flow.
    ///
    /// # Errors
    ///
    /// Returns discovery errors mapped into [`RpError`] and the errors of
    /// [`EffectiveServerConfig::resolve`].
    pub async fn resolve(&self, server: &ServerConfig) -> RpResult<EffectiveServerConfig> {
        let document = self.discovered(server).await?;
        EffectiveServerConfig::resolve(server, document.as_ref())
    }

    /// Like [`resolve`](Self::resolve), and warns when `client` sends a PKCE
    /// challenge the discovered provider does not advertise.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub async fn resolve_for_client(
        &self,
        server: &ServerConfig,
        client: &ClientConfig,
    ) -> RpResult<EffectiveServerConfig> {
        let document = self.discovered(server).await?;
        if let Some(document) = &document {
            if lacks_pkce_support(client, document) {
                tracing::warn!(
                    client_id = %client.client_id,
                    issuer = document.issuer.as_deref().unwrap_or_default(),
                    "PKCE is enabled but the provider does not advertise S256"
                );
            }
        }
        EffectiveServerConfig::resolve(server, document.as_ref())
    }

    async fn discovered(&self, server: &ServerConfig) -> RpResult<Option<OidcDiscoveryDocument>> {
        if !server.discovery {
            return Ok(None);
        }
        let issuer = server
            .issuer
            .as_ref()
            .ok_or_else(|| RpError::Config("discovery requires an issuer".to_string()))?;
        Ok(Some(self.discovery.get(issuer).await?))
    }
}

/// `true` when `client` uses PKCE and `document` does not list `S256`.
#[must_use]
pub fn lacks_pkce_support(client: &ClientConfig, document: &OidcDiscoveryDocument) -> bool {
    client.pkce && !document.supports_pkce_method("S256")
}
