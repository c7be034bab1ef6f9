//! Token endpoint round trips.
//!
//! [`TokenExchangeService`] posts authorization codes and refresh tokens to
//! the provider's token endpoint, stamps the resulting [`Token`] with the
//! instant the request was sent and, when the provider configuration asks
//! for it, validates the ID Token through a [`JwtParser`].

use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;

use super::token::{OAuthErrorResponse, Token};
use crate::error::{RpError, RpResult};
use crate::federation::jwt::JwtParser;
use crate::federation::provider::{ClientConfig, EffectiveServerConfig};
use crate::http::{HttpClient, HttpResponse, TransportError};

const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Exchanges grants for tokens at the token endpoint.
#[derive(Clone)]
pub struct TokenExchangeService {
    http: HttpClient,
    jwt: Option<Arc<dyn JwtParser>>,
}

impl TokenExchangeService {
    /// Creates a service. Without a `jwt` parser ID Tokens are passed
    /// through unvalidated.
    #[must_use]
    pub fn new(http: HttpClient, jwt: Option<Arc<dyn JwtParser>>) -> Self {
        Self { http, jwt }
    }

    /// Exchanges an authorization code.
    ///
    /// Returns `Ok(None)` when the provider answers with an empty body.
    ///
    /// # Errors
    ///
    /// - `RpError::Precondition` if the client uses PKCE and no verifier is given
    /// - `RpError::Transport` on network failure or a non-success status
    /// - `RpError::OAuth` if the provider returned an OAuth error response
    /// - `RpError::MalformedResponse` if the body is not a token response
    /// - `RpError::TokenValidation` if the ID Token is rejected
    pub async fn exchange_code(
        &self,
        server: &EffectiveServerConfig,
        client: &ClientConfig,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
        nonce: Option<&str>,
    ) -> RpResult<Option<Token>> {
        let mut params = vec![
            ("grant_type", GRANT_AUTHORIZATION_CODE),
            ("code", code),
            ("client_id", client.client_id.as_str()),
        ];
        if let Some(secret) = client.secret_for_token_request() {
            params.push(("client_secret", secret));
        }
        if let Some(redirect_uri) = redirect_uri {
            params.push(("redirect_uri", redirect_uri));
        }
        if client.pkce {
            let verifier = code_verifier.ok_or_else(|| {
                RpError::Precondition("PKCE is enabled but no code verifier was stored".to_string())
            })?;
            params.push(("code_verifier", verifier));
        }

        tracing::debug!(
            client_id = %client.client_id,
            token_endpoint = %server.token_endpoint,
            "Exchanging authorization code"
        );

        let created_at = OffsetDateTime::now_utc();
        let response = self.http.post_form(&server.token_endpoint, &params).await?;
        let Some(mut token) = parse_token_response(response, created_at)? else {
            tracing::warn!(client_id = %client.client_id, "Token endpoint returned an empty body");
            return Ok(None);
        };

        self.validate_id_token(&mut token, client, server, nonce)
            .await?;
        Ok(Some(token))
    }

    /// Exchanges a refresh token for a new token.
    ///
    /// Refresh failure is an expected outcome: every failure (transport,
    /// OAuth error, malformed body, rejected ID Token) is logged and
    /// returned as `None`. Refreshed ID Tokens are not nonce-checked.
    pub async fn exchange_refresh_token(
        &self,
        server: &EffectiveServerConfig,
        client: &ClientConfig,
        refresh_token: &str,
    ) -> Option<Token> {
        match self.refresh(server, client, refresh_token).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(client_id = %client.client_id, error = %e, "Token refresh failed");
                None
            }
        }
    }

    /// Checks that the provider still honours `refresh_token` without
    /// parsing the issued token.
    pub async fn validate_refresh_token(
        &self,
        server: &EffectiveServerConfig,
        client: &ClientConfig,
        refresh_token: &str,
    ) -> bool {
        match self.refresh_request(server, client, refresh_token).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(client_id = %client.client_id, error = %e, "Refresh token rejected");
                false
            }
        }
    }

    async fn refresh(
        &self,
        server: &EffectiveServerConfig,
        client: &ClientConfig,
        refresh_token: &str,
    ) -> RpResult<Option<Token>> {
        let created_at = OffsetDateTime::now_utc();
        let response = self.refresh_request(server, client, refresh_token).await?;
        let Some(mut token) = parse_token_response(response, created_at)? else {
            return Ok(None);
        };
        self.validate_id_token(&mut token, client, server, None)
            .await?;
        Ok(Some(token))
    }

    /// Posts a refresh grant. Non-success statuses and OAuth error bodies
    /// become errors.
    async fn refresh_request(
        &self,
        server: &EffectiveServerConfig,
        client: &ClientConfig,
        refresh_token: &str,
    ) -> RpResult<HttpResponse> {
        let mut params = vec![
            ("grant_type", GRANT_REFRESH_TOKEN),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
        ];
        if let Some(secret) = client.secret_for_token_request() {
            params.push(("client_secret", secret));
        }

        tracing::debug!(
            client_id = %client.client_id,
            token_endpoint = %server.token_endpoint,
            "Refreshing token"
        );

        let response = self.http.post_form(&server.token_endpoint, &params).await?;
        check_response(response)
    }

    async fn validate_id_token(
        &self,
        token: &mut Token,
        client: &ClientConfig,
        server: &EffectiveServerConfig,
        nonce: Option<&str>,
    ) -> RpResult<()> {
        let (Some(parser), Some(id_token)) = (&self.jwt, token.id_token.as_deref()) else {
            return Ok(());
        };
        if !server.enable_jwt_validation {
            return Ok(());
        }

        let claims = parser
            .parse_id_token(id_token, client, server, nonce)
            .await?;
        token.id_token_claims = Some(claims);
        Ok(())
    }
}

/// Maps OAuth error bodies and non-success statuses to errors.
fn check_response(response: HttpResponse) -> RpResult<HttpResponse> {
    if let Some(error) = OAuthErrorResponse::parse(&response.body) {
        return Err(error.into());
    }
    if !response.is_success() {
        return Err(TransportError::Status {
            status: response.status,
            body: response.body,
        }
        .into());
    }
    Ok(response)
}

fn parse_token_response(
    response: HttpResponse,
    created_at: OffsetDateTime,
) -> RpResult<Option<Token>> {
    let response = check_response(response)?;
    if response.body.trim().is_empty() {
        return Ok(None);
    }
    // Some providers return a JSON string literal wrapping the object.
    if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(&response.body) {
        return Token::from_json(&inner, created_at).map(Some);
    }
    Token::from_json(&response.body, created_at).map(Some)
}
