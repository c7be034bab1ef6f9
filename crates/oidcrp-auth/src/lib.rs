//! # oidcrp-auth
//!
//! OAuth 2.0 / OpenID Connect relying-party core.
//!
//! This crate provides:
//! - Authorization code flow with PKCE, `state` and `nonce` protection
//! - Token exchange and refresh against the provider's token endpoint
//! - ID Token validation (HMAC client secret or JWKS-resolved keys)
//! - OpenID Connect discovery with document validation and caching
//! - A callback controller dispatching completed flows to data clients
//!
//! ## Modules
//!
//! - [`config`] - TOML configuration
//! - [`error`] - Error taxonomy and error codes
//! - [`http`] - Outbound HTTP transport
//! - [`oauth`] - PKCE, authorization URL, token exchange, logout
//! - [`federation`] - Discovery, JWKS and JWT validation
//! - [`flow`] - Flow state, callback handlers and the flow controller
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use oidcrp_auth::{RpConfig, FlowController, DataClientRegistry, InMemoryFlowStateStore};
//!
//! let config = RpConfig::from_file("oidcrp.toml")?;
//! let controller = FlowController::from_config(
//!     &config,
//!     DataClientRegistry::new(),
//!     Arc::new(InMemoryFlowStateStore::from_config(&config.flow_state)),
//! )?;
//!
//! let outcome = controller
//!     .dispatch(&session_id, &CallbackRequest::from_query(query))
//!     .await;
//! ```

pub mod config;
pub mod error;
pub mod federation;
pub mod flow;
pub mod http;
pub mod oauth;

pub use config::{ConfigError, RpConfig};
pub use error::{RpError, RpResult};
pub use federation::{
    ClientConfig, DiscoveryCache, DiscoveryClient, EffectiveServerConfig, JwtParser,
    JwtValidator, KeyResolverRegistry, OidcDiscoveryDocument, ServerConfig, ServerConfigResolver,
    TokenValidationError,
};
pub use flow::{
    CallbackHandler, CallbackOutcome, CallbackRequest, DataClient, DataClientRegistry,
    FlowController, FlowState, FlowStateStore, HandlerRegistry, InMemoryFlowStateStore,
    UserInfoDataClient,
};
pub use http::{HttpClient, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use oauth::{IdToken, PkceChallenge, PkceVerifier, Token, TokenExchangeService};
