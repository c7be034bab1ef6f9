//! Identity provider metadata and ID Token verification.
//!
//! This module provides:
//!
//! - OpenID Connect discovery with per-issuer caching
//! - Static and discovery-backed provider configuration
//! - JWK set fetching and caching with key rotation
//! - JWT signature and claim validation

pub mod discovery;
pub mod jwks;
pub mod jwt;
pub mod oidc;
pub mod provider;

pub use discovery::{DiscoveryCache, DiscoveryClient, DiscoveryError, discovery_url};
pub use jwks::{JwksError, JwksResolver, KeyResolverRegistry, ResolvedKey};
pub use jwt::{JwtParser, JwtValidator, TokenValidationError};
pub use oidc::{InvalidDocument, OidcDiscoveryDocument};
pub use provider::{ClientConfig, EffectiveServerConfig, ServerConfig, ServerConfigResolver};
