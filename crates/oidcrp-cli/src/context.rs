//! Shared wiring for commands that act on a configured handler.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use oidcrp_auth::flow::FlowServices;
use oidcrp_auth::{
    CallbackHandler, DiscoveryCache, DiscoveryClient, EffectiveServerConfig, HandlerRegistry,
    HttpClient, JwtParser, JwtValidator, KeyResolverRegistry, RpConfig, ServerConfigResolver,
    TokenExchangeService,
};

pub struct RpContext {
    pub config: RpConfig,
    pub http: HttpClient,
    pub handlers: HandlerRegistry,
    pub resolver: ServerConfigResolver,
    pub jwt: Arc<JwtValidator>,
}

impl RpContext {
    pub fn load(path: &Path) -> Result<Self> {
        let config = RpConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            handlers = config.handlers.len(),
            "Loaded configuration"
        );
        Self::from_config(config)
    }

    pub fn from_config(config: RpConfig) -> Result<Self> {
        let http = HttpClient::from_config(&config.http)?;
        let discovery = DiscoveryCache::new(
            DiscoveryClient::new(http.clone()),
            config.discovery.clone(),
        );
        let keys = KeyResolverRegistry::new(http.clone(), config.jwks.clone());
        let jwt = Arc::new(JwtValidator::new(
            Arc::new(keys),
            config.validation.clock_skew,
        ));
        let handlers = HandlerRegistry::from_config(&config);

        Ok(Self {
            resolver: ServerConfigResolver::new(Arc::new(discovery)),
            http,
            handlers,
            jwt,
            config,
        })
    }

    pub fn handler(&self, name: Option<&str>) -> Result<Arc<CallbackHandler>> {
        Ok(self.handlers.get(name)?)
    }

    pub async fn server(&self, handler: &CallbackHandler) -> Result<EffectiveServerConfig> {
        self.resolver
            .resolve(handler.server())
            .await
            .with_context(|| format!("Failed to resolve provider for handler {}", handler.name()))
    }

    pub fn exchange(&self) -> TokenExchangeService {
        let jwt: Arc<dyn JwtParser> = self.jwt.clone();
        TokenExchangeService::new(self.http.clone(), Some(jwt))
    }

    /// Flow services for commands that need callback URLs.
    pub fn flow_services(&self) -> Result<FlowServices> {
        Ok(FlowServices::from_config(&self.config, self.http.clone())?)
    }
}
