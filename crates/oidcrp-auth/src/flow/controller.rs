//! Handler registry and the callback entry point.

use std::sync::Arc;

use indexmap::IndexMap;

use super::data_client::{
    CallbackOutcome, DataClientRegistry, DataContext, error_page_redirect,
};
use super::handler::{CallbackHandler, CallbackRequest, FlowFailure, FlowResponse, FlowServices};
use super::state::{FlowStateStore, flow_key};
use super::urls::CallbackUrls;
use crate::config::RpConfig;
use crate::error::{RpError, RpResult};
use crate::federation::discovery::{DiscoveryCache, DiscoveryClient};
use crate::federation::jwks::KeyResolverRegistry;
use crate::federation::jwt::{JwtParser, JwtValidator};
use crate::federation::provider::ServerConfigResolver;
use crate::http::HttpClient;
use crate::oauth::exchange::TokenExchangeService;

/// Callback handlers by name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: IndexMap<String, Arc<CallbackHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one handler per configuration entry.
    #[must_use]
    pub fn from_config(config: &RpConfig) -> Self {
        let mut registry = Self::new();
        for handler in &config.handlers {
            registry.register(CallbackHandler::from_config(handler));
        }
        registry
    }

    #[must_use]
    pub fn with_handler(mut self, handler: CallbackHandler) -> Self {
        self.register(handler);
        self
    }

    /// Adds `handler`, replacing one registered under the same name.
    pub fn register(&mut self, handler: CallbackHandler) {
        tracing::debug!(handler = handler.name(), "Registered callback handler");
        self.handlers
            .insert(handler.name().to_string(), Arc::new(handler));
    }

    /// Looks up `name`, falling back to the default handler and then to the
    /// first registered one.
    ///
    /// # Errors
    ///
    /// Returns `RpError::HandlerNotFound` if no handler is registered.
    pub fn get(&self, name: Option<&str>) -> RpResult<Arc<CallbackHandler>> {
        name.and_then(|n| self.handlers.get(n))
            .or_else(|| self.handlers.values().find(|h| h.is_default()))
            .or_else(|| self.handlers.values().next())
            .cloned()
            .ok_or_else(|| RpError::HandlerNotFound(name.unwrap_or("<default>").to_string()))
    }

    /// Handler names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl FlowServices {
    /// Wires discovery, JWKS, ID Token validation and token exchange over
    /// `http` as configured.
    ///
    /// # Errors
    ///
    /// Returns `RpError::Config` if the callback base URL is missing or
    /// does not resolve.
    pub fn from_config(config: &RpConfig, http: HttpClient) -> RpResult<Self> {
        let urls = CallbackUrls::from_config(&config.callback)?;
        let discovery = DiscoveryCache::new(
            DiscoveryClient::new(http.clone()),
            config.discovery.clone(),
        );
        let keys = KeyResolverRegistry::new(http.clone(), config.jwks.clone());
        let jwt: Arc<dyn JwtParser> = Arc::new(JwtValidator::new(
            Arc::new(keys),
            config.validation.clock_skew,
        ));

        Ok(Self::new(
            ServerConfigResolver::new(Arc::new(discovery)),
            TokenExchangeService::new(http, Some(jwt)),
            urls,
        ))
    }
}

/// Entry point for inbound callback requests.
///
/// Each request runs one transition of the selected handler over the flow
/// state stored for the browser session, persists the resulting state and
/// hands the outcome to a data client.
pub struct FlowController {
    handlers: HandlerRegistry,
    data_clients: DataClientRegistry,
    store: Arc<dyn FlowStateStore>,
    services: FlowServices,
}

impl FlowController {
    #[must_use]
    pub fn new(
        handlers: HandlerRegistry,
        data_clients: DataClientRegistry,
        store: Arc<dyn FlowStateStore>,
        services: FlowServices,
    ) -> Self {
        Self {
            handlers,
            data_clients,
            store,
            services,
        }
    }

    /// Builds a controller with a reqwest-backed HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `RpError::Config` for an invalid configuration and
    /// `RpError::Transport` if the HTTP client cannot be built.
    pub fn from_config(
        config: &RpConfig,
        data_clients: DataClientRegistry,
        store: Arc<dyn FlowStateStore>,
    ) -> RpResult<Self> {
        config.validate()?;
        let http = HttpClient::from_config(&config.http)?;
        let services = FlowServices::from_config(config, http)?;
        tracing::info!(
            handlers = config.handlers.len(),
            data_clients = data_clients.len(),
            "Flow controller initialized"
        );
        Ok(Self::new(
            HandlerRegistry::from_config(config),
            data_clients,
            store,
            services,
        ))
    }

    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    #[must_use]
    pub fn services(&self) -> &FlowServices {
        &self.services
    }

    /// Handles one callback request for `session_id`.
    ///
    /// Never fails: errors end in the data client's error handler or the
    /// error page.
    pub async fn dispatch(&self, session_id: &str, request: &CallbackRequest) -> CallbackOutcome {
        let handler = match self.handlers.get(request.handler_name.as_deref()) {
            Ok(handler) => handler,
            Err(e) => return self.fail(request.data_client.as_deref(), &(&e).into()).await,
        };
        let key = flow_key(Some(handler.name()));

        let stored = match self.store.get(session_id, &key).await {
            Ok(stored) => stored,
            Err(e) => return self.fail(request.data_client.as_deref(), &(&e).into()).await,
        };
        let data_client = request
            .data_client
            .clone()
            .or_else(|| stored.as_ref().and_then(|s| s.data_client.clone()))
            .or_else(|| handler.data_client().map(str::to_string));

        let step = handler.handle(&self.services, request, stored).await;

        let persisted = match step.state {
            Some(state) => self.store.set(session_id, &key, state).await,
            None => self.store.remove(session_id, &key).await.map(|_| ()),
        };
        if let Err(e) = persisted {
            tracing::error!(handler = handler.name(), error = %e, "Cannot persist flow state");
            return self.fail(data_client.as_deref(), &(&e).into()).await;
        }

        match step.response {
            FlowResponse::Redirect(url) => CallbackOutcome::Redirect(url),
            FlowResponse::Failed(failure) => self.fail(data_client.as_deref(), &failure).await,
            FlowResponse::Authenticated { token, server } => {
                let Some(client) = self.data_clients.get(data_client.as_deref()) else {
                    let err = RpError::DataClientNotFound(
                        data_client.unwrap_or_else(|| "<default>".to_string()),
                    );
                    return error_page_redirect(&(&err).into(), self.services.urls());
                };
                let ctx = DataContext {
                    handler_name: handler.name(),
                    client: handler.client(),
                    server: &server,
                };
                match client.handle_token(&token, &ctx).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(data_client = client.name(), error = %e, "Data client failed");
                        client.handle_error(&(&e).into(), self.services.urls()).await
                    }
                }
            }
        }
    }

    async fn fail(&self, data_client: Option<&str>, failure: &FlowFailure) -> CallbackOutcome {
        tracing::warn!(code = failure.code, message = %failure.message, "Authorization flow failed");
        match self.data_clients.get(data_client) {
            Some(client) => client.handle_error(failure, self.services.urls()).await,
            None => error_page_redirect(failure, self.services.urls()),
        }
    }
}
