//! Tokens returned by the provider's token endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::{RpError, RpResult};

/// Claims extracted from a validated ID Token.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IdToken {
    /// `iss`
    pub issuer: Option<String>,
    /// `sub`
    pub subject: Option<String>,
    /// `aud`, normalized to a list.
    pub audience: Vec<String>,
    /// `nonce`
    pub nonce: Option<String>,
    /// `exp` as epoch seconds.
    pub expiration: Option<String>,
    /// `iat` as epoch seconds.
    pub issued_at: Option<String>,
    /// `idp`, the upstream identity provider of federating providers.
    pub identity_provider: Option<String>,
    /// `acr`, the authentication context class reference.
    pub acr: Option<String>,
    /// Every claim of the token, including the ones above.
    pub claims: Map<String, Value>,
}

impl IdToken {
    /// Shapes a verified claim set.
    #[must_use]
    pub fn from_claims(claims: Map<String, Value>) -> Self {
        let text = |name: &str| claims.get(name).and_then(Value::as_str).map(str::to_string);
        let epoch = |name: &str| {
            claims.get(name).and_then(|v| match v {
                Value::Number(n) => n
                    .as_i64()
                    .map(|secs| secs.to_string())
                    .or_else(|| n.as_f64().map(|secs| (secs as i64).to_string())),
                _ => None,
            })
        };
        let audience = match claims.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Self {
            issuer: text("iss"),
            subject: text("sub"),
            audience,
            nonce: text("nonce"),
            expiration: epoch("exp"),
            issued_at: epoch("iat"),
            identity_provider: text("idp"),
            acr: text("acr"),
            claims,
        }
    }
}

/// An access token with its companions and the instant it was requested.
#[derive(Debug, Clone, Serialize)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds from `created_at`.
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    /// Raw compact ID Token.
    pub id_token: Option<String>,
    /// Validated ID Token claims, when validation ran.
    pub id_token_claims: Option<IdToken>,
    /// Captured immediately before the token request was sent.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Token endpoint response body. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// OAuth 2.0 error response (RFC 6749 §5.2).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorResponse {
    /// Parses `body` if it is a JSON object carrying an `error` member.
    pub(crate) fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}

impl From<OAuthErrorResponse> for RpError {
    fn from(err: OAuthErrorResponse) -> Self {
        RpError::oauth_error(err.error, err.error_description.unwrap_or_default())
    }
}

impl Token {
    /// Parses a token endpoint response created at `created_at`.
    ///
    /// # Errors
    ///
    /// Returns `RpError::MalformedResponse` if the body is not a token response.
    pub fn from_json(body: &str, created_at: OffsetDateTime) -> RpResult<Self> {
        let response: TokenResponse = serde_json::from_str(body)
            .map_err(|e| RpError::MalformedResponse(format!("token response: {e}")))?;

        Ok(Self {
            access_token: response.access_token,
            token_type: response.token_type,
            expires_in: response.expires_in,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            id_token_claims: None,
            created_at,
        })
    }

    /// The instant the access token stops being valid, `None` if it overflows.
    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        let secs = i64::try_from(self.expires_in).ok()?;
        self.created_at.checked_add(time::Duration::seconds(secs))
    }

    /// `created_at + expires_in < now`.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// [`Token::is_expired`] against an explicit clock.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at().is_some_and(|expires_at| expires_at < now)
    }
}
