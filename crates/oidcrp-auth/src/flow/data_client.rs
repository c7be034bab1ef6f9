//! Consumers of completed flows.
//!
//! A [`DataClient`] receives the [`Token`] of a successful flow and decides
//! what the user agent sees next. It also gets the first say on failures;
//! the default is a redirect to the configured error page.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use url::Url;

use super::handler::FlowFailure;
use super::urls::CallbackUrls;
use crate::error::{RpError, RpResult};
use crate::federation::jwt::JwtParser;
use crate::federation::provider::{ClientConfig, EffectiveServerConfig};
use crate::http::HttpClient;
use crate::oauth::token::Token;

/// What the hosting application should send back to the user agent.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// Redirect to this URL.
    Redirect(Url),
    /// Respond with this body.
    Content { content_type: String, body: String },
}

impl CallbackOutcome {
    /// JSON content.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::Content {
            content_type: "application/json".to_string(),
            body: value.to_string(),
        }
    }

    /// Returns the redirect target, if this is a redirect.
    #[must_use]
    pub fn redirect_url(&self) -> Option<&Url> {
        match self {
            Self::Redirect(url) => Some(url),
            Self::Content { .. } => None,
        }
    }
}

/// The flow a token was obtained in.
#[derive(Debug, Clone, Copy)]
pub struct DataContext<'a> {
    pub handler_name: &'a str,
    pub client: &'a ClientConfig,
    pub server: &'a EffectiveServerConfig,
}

/// Consumer of a completed authorization flow.
#[async_trait]
pub trait DataClient: Send + Sync {
    /// Registry name, matched against the `data_client` request parameter.
    fn name(&self) -> &str;

    /// Selected when a request names no known data client.
    fn is_default(&self) -> bool {
        false
    }

    /// Handles the token of a successful flow.
    ///
    /// # Errors
    ///
    /// Errors are routed back to [`DataClient::handle_error`].
    async fn handle_token(&self, token: &Token, ctx: &DataContext<'_>) -> RpResult<CallbackOutcome>;

    /// Handles a failed flow.
    async fn handle_error(&self, failure: &FlowFailure, urls: &CallbackUrls) -> CallbackOutcome {
        error_page_redirect(failure, urls)
    }
}

/// Redirect to the error page with the failure's code.
#[must_use]
pub fn error_page_redirect(failure: &FlowFailure, urls: &CallbackUrls) -> CallbackOutcome {
    tracing::info!(code = failure.code, message = %failure.message, "Redirecting to error page");
    CallbackOutcome::Redirect(urls.error_page_url(failure.code))
}

/// Data clients by name, in registration order.
#[derive(Clone, Default)]
pub struct DataClientRegistry {
    clients: IndexMap<String, Arc<dyn DataClient>>,
}

impl DataClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `client`, replacing one registered under the same name.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn DataClient>) -> Self {
        self.register(client);
        self
    }

    /// Adds `client`, replacing one registered under the same name.
    pub fn register(&mut self, client: Arc<dyn DataClient>) {
        tracing::info!(data_client = client.name(), "Registered data client");
        self.clients.insert(client.name().to_string(), client);
    }

    /// Looks up `name`, falling back to the default client and then to the
    /// first registered one.
    #[must_use]
    pub fn get(&self, name: Option<&str>) -> Option<Arc<dyn DataClient>> {
        name.and_then(|n| self.clients.get(n))
            .or_else(|| self.clients.values().find(|c| c.is_default()))
            .or_else(|| self.clients.values().next())
            .cloned()
    }

    /// Looks up `name` without fallback.
    ///
    /// # Errors
    ///
    /// Returns `RpError::DataClientNotFound` if no client has this name.
    pub fn get_exact(&self, name: &str) -> RpResult<Arc<dyn DataClient>> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| RpError::DataClientNotFound(name.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// GETs `url` with the access token as bearer and returns the body.
///
/// # Errors
///
/// Returns `RpError::Transport` on network failure or a non-success status.
pub async fn fetch_data(http: &HttpClient, url: &Url, access_token: &str) -> RpResult<String> {
    let response = http
        .get_with_bearer(url, access_token)
        .await?
        .error_for_status()?;
    tracing::debug!(url = %url, bytes = response.body.len(), "Fetched provider data");
    Ok(response.body)
}

/// Like [`fetch_data`] for endpoints answering with a JWT; returns the
/// verified claims.
///
/// # Errors
///
/// Returns the errors of [`fetch_data`], `RpError::MalformedResponse` for an
/// empty body and the errors of [`JwtParser::parse_claims`].
pub async fn fetch_jwt_data(
    http: &HttpClient,
    jwt: &dyn JwtParser,
    url: &Url,
    access_token: &str,
    client: &ClientConfig,
    server: &EffectiveServerConfig,
) -> RpResult<Map<String, Value>> {
    let body = fetch_data(http, url, access_token).await?;
    let body = body.trim();
    if body.is_empty() {
        return Err(RpError::MalformedResponse(format!("empty JWT response from {url}")));
    }
    jwt.parse_claims(body, client, server).await
}

/// Data client returning the provider's userinfo document.
///
/// With a [`JwtParser`] the endpoint is expected to answer with a signed
/// JWT, whose verified claims are returned as JSON.
pub struct UserInfoDataClient {
    name: String,
    default: bool,
    http: HttpClient,
    jwt: Option<Arc<dyn JwtParser>>,
    endpoint: Option<Url>,
}

impl UserInfoDataClient {
    #[must_use]
    pub fn new(name: impl Into<String>, http: HttpClient) -> Self {
        Self {
            name: name.into(),
            default: false,
            http,
            jwt: None,
            endpoint: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    /// Decodes JWT userinfo responses with `jwt`.
    #[must_use]
    pub fn with_jwt_parser(mut self, jwt: Arc<dyn JwtParser>) -> Self {
        self.jwt = Some(jwt);
        self
    }

    /// Overrides the provider's userinfo endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}

#[async_trait]
impl DataClient for UserInfoDataClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_default(&self) -> bool {
        self.default
    }

    async fn handle_token(&self, token: &Token, ctx: &DataContext<'_>) -> RpResult<CallbackOutcome> {
        let url = self
            .endpoint
            .as_ref()
            .or(ctx.server.userinfo_endpoint.as_ref())
            .ok_or_else(|| {
                RpError::Config(format!(
                    "handler {} has no userinfo endpoint",
                    ctx.handler_name
                ))
            })?;

        match &self.jwt {
            Some(jwt) => {
                let claims = fetch_jwt_data(
                    &self.http,
                    jwt.as_ref(),
                    url,
                    &token.access_token,
                    ctx.client,
                    ctx.server,
                )
                .await?;
                Ok(CallbackOutcome::json(&Value::Object(claims)))
            }
            None => {
                let body = fetch_data(&self.http, url, &token.access_token).await?;
                Ok(CallbackOutcome::Content {
                    content_type: "application/json".to_string(),
                    body,
                })
            }
        }
    }
}
