//! Relying-party configuration.
//!
//! Configuration is usually loaded from a TOML file. Every section has
//! sensible defaults so a minimal file only lists the flow handlers.
//!
//! # Example (TOML)
//!
//! ```toml
//! [http]
//! request_timeout = "10s"
//!
//! [discovery]
//! ttl = "1h"
//!
//! [flow_state]
//! ttl = "10m"
//!
//! [callback]
//! base_url = "https://app.example.com/"
//!
//! [[handlers]]
//! name = "franceconnect"
//! default = true
//!
//! [handlers.client]
//! client_id = "abc"
//! client_secret = "s3cr3t"
//! scopes = ["openid", "profile"]
//! pkce = true
//!
//! [handlers.server]
//! issuer = "https://idp.example.com"
//! discovery = true
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::federation::provider::{ClientConfig, ServerConfig};

/// Default path of the callback endpoint, relative to `callback.base_url`.
pub const DEFAULT_CALLBACK_PATH: &str = "servlet/plugins/oauth2/callback";

/// Default error page, relative to `callback.base_url`.
pub const DEFAULT_ERROR_PAGE: &str = "jsp/site/Portal.jsp?page=oauth2error";

/// Root relying-party configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RpConfig {
    /// Outbound HTTP limits.
    pub http: HttpConfig,

    /// Discovery document caching.
    pub discovery: DiscoveryConfig,

    /// JWKS caching.
    pub jwks: JwksConfig,

    /// ID Token validation settings.
    pub validation: ValidationConfig,

    /// Pending authorization flow lifetime.
    pub flow_state: FlowStateConfig,

    /// Callback endpoint and error page location.
    pub callback: CallbackConfig,

    /// Configured authorization flows.
    pub handlers: Vec<HandlerConfig>,
}

/// Outbound HTTP configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Deadline for every outbound call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Maximum accepted response body size in bytes.
    pub max_response_size: usize,

    /// Accept plain `http` endpoints. Tests and local development only.
    pub allow_http: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl HttpConfig {
    /// Sets the per-call deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the maximum response size.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Allows HTTP (non-HTTPS) endpoints.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Discovery cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How long a fetched discovery document stays valid.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
        }
    }
}

impl DiscoveryConfig {
    /// Sets the cache TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// JWKS cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwksConfig {
    /// TTL when the JWKS response carries no `Cache-Control: max-age`.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Lower bound applied to `max-age`.
    #[serde(with = "humantime_serde")]
    pub min_ttl: Duration,

    /// Upper bound applied to `max-age`.
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600), // 1 hour
            min_ttl: Duration::from_secs(300),      // 5 minutes
            max_ttl: Duration::from_secs(86400),    // 24 hours
        }
    }
}

impl JwksConfig {
    /// Sets the default TTL.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the minimum TTL.
    #[must_use]
    pub fn with_min_ttl(mut self, ttl: Duration) -> Self {
        self.min_ttl = ttl;
        self
    }

    /// Sets the maximum TTL.
    #[must_use]
    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }
}

/// ID Token validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Leeway applied to `exp` checks.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            clock_skew: Duration::from_secs(60),
        }
    }
}

/// Pending flow state configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowStateConfig {
    /// How long a flow started by an authorization redirect may wait for
    /// its callback.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for FlowStateConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600), // 10 minutes
        }
    }
}

impl FlowStateConfig {
    /// Sets the flow state TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Callback endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Public base URL of the hosting application.
    pub base_url: Option<Url>,

    /// Callback path, relative to `base_url`.
    pub path: String,

    /// Error page, relative to `base_url`.
    pub error_page: String,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            path: DEFAULT_CALLBACK_PATH.to_string(),
            error_page: DEFAULT_ERROR_PAGE.to_string(),
        }
    }
}

/// A named authorization flow.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandlerConfig {
    /// Handler name, used as the `handler_name` callback parameter and to
    /// namespace flow state.
    pub name: String,

    /// Selected when a request names no handler.
    #[serde(default)]
    pub default: bool,

    /// Bound data client, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_client: Option<String>,

    /// Client registration at the provider.
    pub client: ClientConfig,

    /// Provider endpoints.
    pub server: ServerConfig,
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for this schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is present but not acceptable.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required value is absent.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl RpConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML and the errors of
    /// [`RpConfig::validate`] for inconsistent values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise the
    /// errors of [`RpConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` or `ConfigError::Missing` if:
    /// - the request timeout is zero
    /// - JWKS TTL bounds are inverted
    /// - handler names are empty or duplicated, or several handlers are default
    /// - a handler's client or server section is inconsistent
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "http.request_timeout must be greater than zero".to_string(),
            ));
        }

        if self.flow_state.ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "flow_state.ttl must be greater than zero".to_string(),
            ));
        }

        if self.jwks.min_ttl > self.jwks.max_ttl {
            return Err(ConfigError::InvalidValue(
                "jwks.min_ttl must not exceed jwks.max_ttl".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for handler in &self.handlers {
            if handler.name.trim().is_empty() {
                return Err(ConfigError::Missing("handlers.name".to_string()));
            }
            if !names.insert(handler.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate handler name '{}'",
                    handler.name
                )));
            }
            handler
                .client
                .validate()
                .and_then(|()| handler.server.validate(self.http.allow_http))
                .map_err(|e| match e {
                    ConfigError::InvalidValue(msg) => {
                        ConfigError::InvalidValue(format!("handler '{}': {msg}", handler.name))
                    }
                    ConfigError::Missing(field) => {
                        ConfigError::Missing(format!("handler '{}': {field}", handler.name))
                    }
                    other => other,
                })?;
        }

        if self.handlers.iter().filter(|h| h.default).count() > 1 {
            return Err(ConfigError::InvalidValue(
                "at most one handler may be marked default".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[http]
request_timeout = "5s"

[discovery]
ttl = "30m"

[flow_state]
ttl = "5m"

[callback]
base_url = "https://app.example.com/"

[[handlers]]
name = "franceconnect"
default = true
data_client = "userinfo"

[handlers.client]
client_id = "abc"
client_secret = "s3cr3t"
scopes = ["openid", "profile"]
acr_values = ["eidas2", "eidas1"]
pkce = true

[handlers.server]
issuer = "https://idp.example.com"
discovery = true

[[handlers]]
name = "static"

[handlers.client]
client_id = "xyz"
public = true

[handlers.server]
authorization_endpoint = "https://idp.example.com/authorize"
token_endpoint = "https://idp.example.com/token"
signing_algorithms = ["HS512"]
"#;

    #[test]
    fn test_default_config() {
        let config = RpConfig::default();
        assert_eq!(config.http.request_timeout, Duration::from_secs(10));
        assert!(!config.http.allow_http);
        assert_eq!(config.discovery.ttl, Duration::from_secs(3600));
        assert_eq!(config.validation.clock_skew, Duration::from_secs(60));
        assert_eq!(config.flow_state.ttl, Duration::from_secs(600));
        assert_eq!(config.callback.path, DEFAULT_CALLBACK_PATH);
        assert!(config.handlers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config = RpConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.http.request_timeout, Duration::from_secs(5));
        assert_eq!(config.discovery.ttl, Duration::from_secs(1800));
        assert_eq!(config.flow_state.ttl, Duration::from_secs(300));
        assert_eq!(config.handlers.len(), 2);

        let fc = &config.handlers[0];
        assert!(fc.default);
        assert_eq!(fc.data_client.as_deref(), Some("userinfo"));
        assert!(fc.client.pkce);
        assert!(fc.client.scopes.contains("profile"));
        assert_eq!(
            fc.client.acr_values.iter().collect::<Vec<_>>(),
            vec!["eidas2", "eidas1"]
        );
        assert!(fc.server.discovery);

        let st = &config.handlers[1];
        assert!(st.client.public);
        assert_eq!(st.client.scopes.len(), 1);
        assert_eq!(
            st.server.signing_algorithms.as_deref(),
            Some(&["HS512".to_string()][..])
        );
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rp.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = RpConfig::from_file(&path).unwrap();
        assert_eq!(config.handlers[0].name, "franceconnect");

        let err = RpConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_zero_flow_state_ttl_fails_validation() {
        let source = SAMPLE.replace("ttl = \"5m\"", "ttl = \"0s\"");
        let err = RpConfig::from_toml_str(&source).unwrap_err();
        assert!(err.to_string().contains("flow_state.ttl"));
    }

    #[test]
    fn test_invalid_toml() {
        let err = RpConfig::from_toml_str("[http\nrequest_timeout = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_duplicate_handler_names_fail_validation() {
        let source = SAMPLE.replace("name = \"static\"", "name = \"franceconnect\"");
        let err = RpConfig::from_toml_str(&source).unwrap_err();
        assert!(err.to_string().contains("duplicate handler name"));
    }

    #[test]
    fn test_two_defaults_fail_validation() {
        let source = SAMPLE.replace("name = \"static\"", "name = \"static\"\ndefault = true");
        let err = RpConfig::from_toml_str(&source).unwrap_err();
        assert!(err.to_string().contains("at most one handler"));
    }

    #[test]
    fn test_confidential_client_requires_secret() {
        let source = SAMPLE.replace("client_secret = \"s3cr3t\"\n", "");
        let err = RpConfig::from_toml_str(&source).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
        assert!(err.to_string().contains("franceconnect"));
        assert!(err.to_string().contains("client_secret"));
    }

    #[test]
    fn test_discovery_issuer_must_be_https() {
        let source = SAMPLE.replace(
            "issuer = \"https://idp.example.com\"",
            "issuer = \"http://idp.example.com\"",
        );
        let err = RpConfig::from_toml_str(&source).unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn test_zero_timeout_fails_validation() {
        let mut config = RpConfig::default();
        config.http.request_timeout = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue("test error".to_string());
        assert_eq!(err.to_string(), "Invalid configuration value: test error");

        let err = ConfigError::Missing("required_field".to_string());
        assert_eq!(
            err.to_string(),
            "Missing required configuration: required_field"
        );
    }
}
