//! The authorization code flow as a state machine.
//!
//! ```text
//! Idle ──(no code, no error)──▶ AuthorizationRequested ──redirect──▶ provider
//!                                                                    │
//! Error ◀──(error | state mismatch | exchange failure)── CallbackReceived
//!                                                                    │
//!                                                                 Success
//! ```
//!
//! [`CallbackHandler::handle`] is one transition: it takes the inbound
//! request and the flow state stored for this handler and returns the
//! response together with the flow state to keep. Loading and saving that
//! state is the controller's job.

use url::Url;

use super::state::FlowState;
use super::urls::{
    CallbackUrls, PARAMETER_CODE, PARAMETER_COMPLEMENTARY_PARAMETER, PARAMETER_DATA_CLIENT,
    PARAMETER_ERROR, PARAMETER_ERROR_DESCRIPTION, PARAMETER_HANDLER_NAME, PARAMETER_STATE,
    with_round_trip_parameters,
};
use crate::config::HandlerConfig;
use crate::error::{ERROR_RETRIEVING_AN_AUTHORIZATION_CODE, RpError, RpResult};
use crate::federation::provider::{
    ClientConfig, EffectiveServerConfig, ServerConfig, ServerConfigResolver,
};
use crate::oauth::authorize::{
    AuthorizationRequest, PARAMETER_BACK_PROMPT_URL, parse_complementary_parameters,
};
use crate::oauth::exchange::TokenExchangeService;
use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
use crate::oauth::token::Token;

/// Query parameters of an inbound callback request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackRequest {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub state: Option<String>,
    pub handler_name: Option<String>,
    pub data_client: Option<String>,
    pub complementary_parameter: Option<String>,
    pub back_prompt_url: Option<String>,
}

impl CallbackRequest {
    /// Reads the known parameters from a raw query string. Empty values
    /// count as absent.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let mut request = Self::default();
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            let slot = match name.as_ref() {
                PARAMETER_CODE => &mut request.code,
                PARAMETER_ERROR => &mut request.error,
                PARAMETER_ERROR_DESCRIPTION => &mut request.error_description,
                PARAMETER_STATE => &mut request.state,
                PARAMETER_HANDLER_NAME => &mut request.handler_name,
                PARAMETER_DATA_CLIENT => &mut request.data_client,
                PARAMETER_COMPLEMENTARY_PARAMETER => &mut request.complementary_parameter,
                PARAMETER_BACK_PROMPT_URL => &mut request.back_prompt_url,
                _ => continue,
            };
            slot.get_or_insert_with(|| value.into_owned());
        }
        request
    }

    /// Reads the known parameters from `url`'s query.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        Self::from_query(url.query().unwrap_or_default())
    }
}

/// A terminal failure, as shown to data clients and the error page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFailure {
    /// Machine-readable code, see [`RpError::error_code`].
    pub code: &'static str,
    /// Human-readable cause, for logs.
    pub message: String,
}

impl FlowFailure {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&RpError> for FlowFailure {
    fn from(err: &RpError) -> Self {
        Self::new(err.error_code(), err.to_string())
    }
}

/// Result of one transition.
#[derive(Debug)]
pub enum FlowResponse {
    /// Send the user agent to the provider's authorization endpoint.
    Redirect(Url),
    /// The code was exchanged and the ID Token validated.
    Authenticated {
        token: Box<Token>,
        server: Box<EffectiveServerConfig>,
    },
    /// The flow ended in error.
    Failed(FlowFailure),
}

/// A transition's response and the flow state to keep (`None` clears it).
#[derive(Debug)]
pub struct FlowStep {
    pub response: FlowResponse,
    pub state: Option<FlowState>,
}

impl FlowStep {
    fn failed(err: &RpError, state: Option<FlowState>) -> Self {
        Self {
            response: FlowResponse::Failed(err.into()),
            state,
        }
    }
}

/// Services shared by every handler.
#[derive(Clone)]
pub struct FlowServices {
    resolver: ServerConfigResolver,
    exchange: TokenExchangeService,
    urls: CallbackUrls,
}

impl FlowServices {
    #[must_use]
    pub fn new(
        resolver: ServerConfigResolver,
        exchange: TokenExchangeService,
        urls: CallbackUrls,
    ) -> Self {
        Self {
            resolver,
            exchange,
            urls,
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &ServerConfigResolver {
        &self.resolver
    }

    #[must_use]
    pub fn exchange(&self) -> &TokenExchangeService {
        &self.exchange
    }

    #[must_use]
    pub fn urls(&self) -> &CallbackUrls {
        &self.urls
    }
}

/// One configured authorization flow: a client registration at one provider.
#[derive(Debug, Clone)]
pub struct CallbackHandler {
    name: String,
    default: bool,
    data_client: Option<String>,
    client: ClientConfig,
    server: ServerConfig,
}

impl CallbackHandler {
    #[must_use]
    pub fn new(name: impl Into<String>, client: ClientConfig, server: ServerConfig) -> Self {
        Self {
            name: name.into(),
            default: false,
            data_client: None,
            client,
            server,
        }
    }

    #[must_use]
    pub fn from_config(config: &HandlerConfig) -> Self {
        Self {
            name: config.name.clone(),
            default: config.default,
            data_client: config.data_client.clone(),
            client: config.client.clone(),
            server: config.server.clone(),
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    #[must_use]
    pub fn with_data_client(mut self, name: impl Into<String>) -> Self {
        self.data_client = Some(name.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.default
    }

    /// The data client bound in configuration.
    #[must_use]
    pub fn data_client(&self) -> Option<&str> {
        self.data_client.as_deref()
    }

    #[must_use]
    pub fn client(&self) -> &ClientConfig {
        &self.client
    }

    #[must_use]
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Performs one transition of the flow.
    ///
    /// - `error` parameter: the provider refused; the flow ends in error
    /// - `code` parameter: the state is checked before anything else, then
    ///   the code is exchanged
    /// - neither: a new authorization request replaces `state`
    pub async fn handle(
        &self,
        services: &FlowServices,
        request: &CallbackRequest,
        state: Option<FlowState>,
    ) -> FlowStep {
        if let Some(error) = &request.error {
            let message = match &request.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error.clone(),
            };
            tracing::warn!(handler = %self.name, error = %message, "Provider returned an authorization error");
            return FlowStep {
                response: FlowResponse::Failed(FlowFailure::new(
                    ERROR_RETRIEVING_AN_AUTHORIZATION_CODE,
                    message,
                )),
                state: None,
            };
        }

        if let Some(code) = &request.code {
            return self.handle_code(services, request, code, state).await;
        }

        match self.authorization_request(services, request).await {
            Ok((url, flow)) => FlowStep {
                response: FlowResponse::Redirect(url),
                state: Some(flow),
            },
            Err(e) => {
                log_failure(&self.name, "authorization_request", &e);
                FlowStep::failed(&e, state)
            }
        }
    }

    async fn handle_code(
        &self,
        services: &FlowServices,
        request: &CallbackRequest,
        code: &str,
        state: Option<FlowState>,
    ) -> FlowStep {
        let Some(stored) = state else {
            tracing::warn!(handler = %self.name, "Callback without a pending authorization request");
            return FlowStep::failed(&RpError::Csrf, None);
        };
        if request.state.as_deref() != Some(stored.state.as_str()) {
            tracing::warn!(handler = %self.name, "Callback state does not match the stored state");
            return FlowStep::failed(&RpError::Csrf, None);
        }

        match self.exchange_code(services, code, &stored).await {
            Ok((token, server)) => {
                tracing::info!(handler = %self.name, client_id = %self.client.client_id, "Authorization flow completed");
                FlowStep {
                    response: FlowResponse::Authenticated {
                        token: Box::new(token),
                        server: Box::new(server),
                    },
                    state: None,
                }
            }
            Err(e) => {
                log_failure(&self.name, "token_exchange", &e);
                FlowStep::failed(&e, None)
            }
        }
    }

    async fn authorization_request(
        &self,
        services: &FlowServices,
        request: &CallbackRequest,
    ) -> RpResult<(Url, FlowState)> {
        let server = services
            .resolver
            .resolve_for_client(&self.server, &self.client)
            .await?;

        let data_client = request
            .data_client
            .clone()
            .or_else(|| self.data_client.clone());
        let callback = match &self.client.redirect_uri {
            Some(uri) => uri.clone(),
            None => services
                .urls
                .callback_url(Some(&self.name), data_client.as_deref()),
        };
        let redirect_uri = with_round_trip_parameters(
            callback,
            request.complementary_parameter.as_deref(),
            request.back_prompt_url.as_deref(),
        );

        let mut flow = FlowState::generate(redirect_uri.as_str()).with_data_client(data_client);
        let challenge = if self.client.pkce {
            let verifier = PkceVerifier::generate();
            let challenge = PkceChallenge::from_verifier(&verifier);
            flow = flow.with_code_verifier(verifier.into_inner());
            Some(challenge)
        } else {
            None
        };
        let extra_params = request
            .complementary_parameter
            .as_deref()
            .map(parse_complementary_parameters)
            .unwrap_or_default();

        let url = AuthorizationRequest {
            client: &self.client,
            redirect_uri: &flow.redirect_uri,
            state: &flow.state,
            nonce: &flow.nonce,
            code_challenge: challenge.as_ref(),
            extra_params: &extra_params,
            back_prompt_url: request.back_prompt_url.as_deref(),
        }
        .to_url(&server.authorization_endpoint);

        tracing::debug!(
            handler = %self.name,
            authorization_endpoint = %server.authorization_endpoint,
            pkce = self.client.pkce,
            "Redirecting to authorization endpoint"
        );
        Ok((url, flow))
    }

    async fn exchange_code(
        &self,
        services: &FlowServices,
        code: &str,
        stored: &FlowState,
    ) -> RpResult<(Token, EffectiveServerConfig)> {
        let server = services.resolver.resolve(&self.server).await?;
        let token = services
            .exchange
            .exchange_code(
                &server,
                &self.client,
                code,
                Some(&stored.redirect_uri),
                stored.code_verifier.as_deref(),
                Some(&stored.nonce),
            )
            .await?
            .ok_or_else(|| {
                RpError::MalformedResponse("token endpoint returned an empty body".to_string())
            })?;
        Ok((token, server))
    }
}

/// Misconfiguration is an error; provider and token problems are warnings.
fn log_failure(handler: &str, stage: &'static str, err: &RpError) {
    if err.is_fatal() {
        tracing::error!(handler, stage, error = %err, "Handler is misconfigured");
    } else if err.is_validation_error() {
        tracing::warn!(handler, stage, error = %err, "ID Token rejected");
    } else if err.is_external_error() {
        tracing::warn!(handler, stage, error = %err, "Provider call failed");
    } else {
        tracing::warn!(handler, stage, error = %err, "Flow step failed");
    }
}
