//! OAuth 2.0 client side of the authorization code grant.
//!
//! - [`pkce`] - PKCE verifier/challenge generation (RFC 7636)
//! - [`authorize`] - Authorization request URL
//! - [`exchange`] - Token endpoint round trips
//! - [`token`] - Token and ID Token types
//! - [`logout`] - RP-initiated logout URL

pub mod authorize;
pub mod exchange;
pub mod logout;
pub mod pkce;
pub mod token;

pub use authorize::{AuthorizationRequest, parse_complementary_parameters};
pub use exchange::TokenExchangeService;
pub use logout::build_logout_url;
pub use pkce::{
    PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier, generate_code_challenge,
    generate_code_verifier,
};
pub use token::{IdToken, Token};
