//! Callback and error-page URLs of the hosting application.

use url::Url;

use crate::config::{CallbackConfig, ConfigError};
use crate::oauth::authorize::PARAMETER_BACK_PROMPT_URL;

pub const PARAMETER_CODE: &str = "code";
pub const PARAMETER_ERROR: &str = "error";
pub const PARAMETER_ERROR_DESCRIPTION: &str = "error_description";
pub const PARAMETER_STATE: &str = "state";
pub const PARAMETER_HANDLER_NAME: &str = "handler_name";
pub const PARAMETER_DATA_CLIENT: &str = "data_client";
pub const PARAMETER_COMPLEMENTARY_PARAMETER: &str = "complementary_parameter";

/// Absolute callback and error-page URLs derived from [`CallbackConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrls {
    callback: Url,
    error_page: Url,
}

impl CallbackUrls {
    /// Resolves the configured paths against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` without a base URL and
    /// `ConfigError::InvalidValue` if a path does not resolve.
    pub fn from_config(config: &CallbackConfig) -> Result<Self, ConfigError> {
        let base = config
            .base_url
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("callback.base_url".to_string()))?;
        Self::new(base, &config.path, &config.error_page)
    }

    /// Resolves `path` and `error_page` against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a path does not resolve.
    pub fn new(base_url: &Url, path: &str, error_page: &str) -> Result<Self, ConfigError> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        let join = |relative: &str| {
            base.join(relative.trim_start_matches('/')).map_err(|e| {
                ConfigError::InvalidValue(format!("cannot resolve '{relative}' against {base}: {e}"))
            })
        };
        Ok(Self {
            callback: join(path)?,
            error_page: join(error_page)?,
        })
    }

    /// The bare callback endpoint.
    #[must_use]
    pub fn callback(&self) -> &Url {
        &self.callback
    }

    /// Callback URL selecting `handler_name` and `data_client`.
    #[must_use]
    pub fn callback_url(&self, handler_name: Option<&str>, data_client: Option<&str>) -> Url {
        let mut url = self.callback.clone();
        append_pairs(
            &mut url,
            [
                (PARAMETER_DATA_CLIENT, data_client),
                (PARAMETER_HANDLER_NAME, handler_name),
            ],
        );
        url
    }

    /// Error page URL carrying `error=<code>`.
    #[must_use]
    pub fn error_page_url(&self, code: &str) -> Url {
        let mut url = self.error_page.clone();
        url.query_pairs_mut().append_pair(PARAMETER_ERROR, code);
        url
    }
}

/// Adds the inbound passthrough values to `redirect_uri` so they come back
/// on the callback.
#[must_use]
pub fn with_round_trip_parameters(
    mut redirect_uri: Url,
    complementary_parameter: Option<&str>,
    back_prompt_url: Option<&str>,
) -> Url {
    append_pairs(
        &mut redirect_uri,
        [
            (PARAMETER_COMPLEMENTARY_PARAMETER, complementary_parameter),
            (PARAMETER_BACK_PROMPT_URL, back_prompt_url),
        ],
    );
    redirect_uri
}

fn append_pairs<'a>(url: &mut Url, pairs: impl IntoIterator<Item = (&'a str, Option<&'a str>)>) {
    let present: Vec<_> = pairs
        .into_iter()
        .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (name, v)))
        .collect();
    if present.is_empty() {
        return;
    }
    url.query_pairs_mut().extend_pairs(present);
}
