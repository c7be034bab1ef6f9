//! Error taxonomy of the relying party.
//!
//! Component errors ([`DiscoveryError`], [`JwksError`],
//! [`TokenValidationError`], [`TransportError`], [`ConfigError`]) convert
//! into [`RpError`], the type every public flow operation returns. The flow
//! controller turns an `RpError` into a terminal error response using
//! [`RpError::error_code`], so end users only ever see a stable code.

use crate::config::ConfigError;
use crate::federation::discovery::DiscoveryError;
use crate::federation::jwks::JwksError;
use crate::federation::jwt::TokenValidationError;
use crate::http::TransportError;

/// Error code for a callback whose `state` does not match the flow state.
pub const ERROR_INVALID_STATE: &str = "ERROR_INVALID_STATE";
/// Error code for a failed token endpoint round trip.
pub const ERROR_RETRIEVING_TOKEN: &str = "ERROR_RETRIEVING_TOKEN";
/// Error code for a provider that answered the authorization request with an error.
pub const ERROR_RETRIEVING_AN_AUTHORIZATION_CODE: &str = "ERROR_RETRIEVING_AN_AUTHORIZATION_CODE";
/// Error code for a rejected ID Token.
pub const ERROR_INVALID_TOKEN: &str = "ERROR_INVALID_TOKEN";
/// Error code for provider or handler misconfiguration.
pub const ERROR_CONFIGURATION: &str = "ERROR_CONFIGURATION";
/// Error code for a flow-state store failure.
pub const ERROR_SESSION: &str = "ERROR_SESSION";

/// Errors surfaced by relying-party operations.
#[derive(Debug, thiserror::Error)]
pub enum RpError {
    /// Invalid static or discovered configuration. Fatal for the flow.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation was invoked on input it cannot accept.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Network or HTTP failure talking to the provider.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The provider answered with a body that is not the expected JSON.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The ID Token (or another JWT) was rejected.
    #[error("Token validation failed: {0}")]
    TokenValidation(#[from] TokenValidationError),

    /// The callback `state` does not match the stored value.
    #[error("Invalid state parameter")]
    Csrf,

    /// The provider returned an OAuth error response.
    #[error("OAuth error from provider: {error} - {description}")]
    OAuth {
        /// The OAuth error code.
        error: String,
        /// Optional error description.
        description: String,
    },

    /// No callback handler is registered under this name.
    #[error("Callback handler not found: {0}")]
    HandlerNotFound(String),

    /// No data client is registered under this name.
    #[error("Data client not found: {0}")]
    DataClientNotFound(String),

    /// The flow-state store failed.
    #[error("Flow state storage error: {0}")]
    Storage(String),
}

/// Type alias for relying-party results.
pub type RpResult<T> = Result<T, RpError>;

impl RpError {
    /// Creates an `OAuth` error from a provider response.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns `true` if this is a token validation error.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::TokenValidation(_))
    }

    /// Returns `true` if the provider or the network is at fault.
    #[must_use]
    pub fn is_external_error(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::MalformedResponse(_) | Self::OAuth { .. }
        )
    }

    /// Returns `true` if retrying the flow cannot succeed without a
    /// configuration change.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::HandlerNotFound(_) | Self::DataClientNotFound(_)
        )
    }

    /// Machine-readable code used in error-page redirects.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Csrf => ERROR_INVALID_STATE,
            Self::Transport(_) | Self::MalformedResponse(_) | Self::OAuth { .. } => {
                ERROR_RETRIEVING_TOKEN
            }
            Self::TokenValidation(_) => ERROR_INVALID_TOKEN,
            Self::Storage(_) => ERROR_SESSION,
            Self::Config(_)
            | Self::Precondition(_)
            | Self::HandlerNotFound(_)
            | Self::DataClientNotFound(_) => ERROR_CONFIGURATION,
        }
    }
}

impl From<ConfigError> for RpError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<DiscoveryError> for RpError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::Precondition(msg) => Self::Precondition(msg),
            DiscoveryError::Invalid(invalid) => {
                Self::Config(format!("invalid discovery document: {invalid}"))
            }
            DiscoveryError::Transport(e) => Self::Transport(e),
            DiscoveryError::Parse(msg) => {
                Self::MalformedResponse(format!("discovery document: {msg}"))
            }
        }
    }
}

/// Key misses are validation failures. An unreachable or unparseable JWKS
/// endpoint is a configuration problem that aborts the attempt.
impl From<JwksError> for RpError {
    fn from(err: JwksError) -> Self {
        match err {
            JwksError::KeyNotFound(kid) => {
                Self::TokenValidation(TokenValidationError::KeyNotFound(kid))
            }
            JwksError::AmbiguousKey(_) => Self::TokenValidation(TokenValidationError::MissingKeyId),
            other => Self::Config(format!("JWKS endpoint unusable: {other}")),
        }
    }
}
