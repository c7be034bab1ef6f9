//! OpenID Connect discovery document.
//!
//! Fields are parsed tolerantly: every field is optional at the serde level
//! and unknown fields are ignored, so that a missing required value is
//! reported by [`OidcDiscoveryDocument::validate`] with a readable cause
//! instead of surfacing as a JSON error.

use serde::{Deserialize, Serialize};
use url::Url;

/// Provider metadata served at `{issuer}/.well-known/openid-configuration`.
///
/// # Example
///
/// ```
/// use oidcrp_auth::federation::oidc::OidcDiscoveryDocument;
///
/// let json = r#"{
///     "issuer": "https://auth.example.com",
///     "authorization_endpoint": "https://auth.example.com/authorize",
///     "token_endpoint": "https://auth.example.com/token",
///     "jwks_uri": "https://auth.example.com/jwks",
///     "response_types_supported": ["code"],
///     "subject_types_supported": ["public"],
///     "id_token_signing_alg_values_supported": ["RS256"]
/// }"#;
///
/// let doc: OidcDiscoveryDocument = serde_json::from_str(json).unwrap();
/// let issuer = url::Url::parse("https://auth.example.com").unwrap();
/// assert!(doc.validate(&issuer).is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OidcDiscoveryDocument {
    /// URL the provider asserts as its Issuer Identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Authorization endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// UserInfo endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// JSON Web Key Set document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// Dynamic client registration endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// RP-initiated logout endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Entries are kept optional so that `null` members can be rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_types_supported: Option<Vec<Option<String>>>,

    /// Entries are kept optional so that `null` members can be rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_types_supported: Option<Vec<Option<String>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_signing_alg_values_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr_values_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims_supported: Option<Vec<String>>,
}

/// Reason a discovery document was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidDocument(pub String);

impl OidcDiscoveryDocument {
    /// Checks the document against the issuer it was fetched for.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule:
    /// - issuer present, equal to `expected_issuer`, `https`, without query or fragment
    /// - authorization endpoint present and `https`
    /// - token, userinfo, registration and end-session endpoints `https` when present
    /// - JWKS URI present and `https`
    /// - response and subject types present without `null` entries
    /// - ID Token signing algorithms include `RS256`
    /// - token endpoint auth signing algorithms exclude `none`
    pub fn validate(&self, expected_issuer: &Url) -> Result<(), InvalidDocument> {
        let issuer = required("issuer", self.issuer.as_deref())?;
        let issuer_url = https_url("issuer", issuer)?;
        if issuer_url.query().is_some() || issuer_url.fragment().is_some() {
            return Err(InvalidDocument(format!(
                "issuer {issuer} must not contain a query or fragment"
            )));
        }
        if !issuer_matches(issuer, expected_issuer) {
            return Err(InvalidDocument(format!(
                "issuer mismatch: expected {expected_issuer}, got {issuer}"
            )));
        }

        let authorization = required(
            "authorization_endpoint",
            self.authorization_endpoint.as_deref(),
        )?;
        https_url("authorization_endpoint", authorization)?;

        for (name, value) in [
            ("token_endpoint", &self.token_endpoint),
            ("userinfo_endpoint", &self.userinfo_endpoint),
            ("registration_endpoint", &self.registration_endpoint),
            ("end_session_endpoint", &self.end_session_endpoint),
        ] {
            if let Some(value) = value {
                https_url(name, value)?;
            }
        }

        let jwks_uri = required("jwks_uri", self.jwks_uri.as_deref())?;
        https_url("jwks_uri", jwks_uri)?;

        no_null_entries("response_types_supported", &self.response_types_supported)?;
        no_null_entries("subject_types_supported", &self.subject_types_supported)?;

        let algorithms = self
            .id_token_signing_alg_values_supported
            .as_deref()
            .unwrap_or_default();
        if !algorithms.iter().any(|alg| alg == "RS256") {
            return Err(InvalidDocument(
                "id_token_signing_alg_values_supported must include RS256".to_string(),
            ));
        }

        if self
            .token_endpoint_auth_signing_alg_values_supported
            .as_deref()
            .is_some_and(|algs| algs.iter().any(|alg| alg == "none"))
        {
            return Err(InvalidDocument(
                "token_endpoint_auth_signing_alg_values_supported must not include none"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Returns `true` if the provider advertises the given PKCE method.
    #[must_use]
    pub fn supports_pkce_method(&self, method: &str) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .is_some_and(|methods| methods.iter().any(|m| m == method))
    }

    /// Returns `true` if the provider advertises the grant type. Providers
    /// that omit the list support `authorization_code` and `implicit`.
    #[must_use]
    pub fn supports_grant_type(&self, grant_type: &str) -> bool {
        match &self.grant_types_supported {
            Some(types) => types.iter().any(|t| t == grant_type),
            None => matches!(grant_type, "authorization_code" | "implicit"),
        }
    }
}

/// Exact comparison of the asserted issuer with the expected one.
///
/// `Url` serializes an empty path as `/`, so a bare-origin issuer also
/// matches without the trailing slash. Case, port and path are never
/// normalized.
fn issuer_matches(issuer: &str, expected: &Url) -> bool {
    let expected_str = expected.as_str();
    if issuer == expected_str {
        return true;
    }
    expected.path() == "/"
        && expected.query().is_none()
        && expected.fragment().is_none()
        && expected_str.strip_suffix('/') == Some(issuer)
}

fn required<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str, InvalidDocument> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(InvalidDocument(format!("{name} is required"))),
    }
}

fn https_url(name: &str, value: &str) -> Result<Url, InvalidDocument> {
    let url = Url::parse(value)
        .map_err(|e| InvalidDocument(format!("{name} is not a valid URL ({value}): {e}")))?;
    if url.scheme() != "https" {
        return Err(InvalidDocument(format!("{name} must use https: {value}")));
    }
    Ok(url)
}

fn no_null_entries(
    name: &str,
    values: &Option<Vec<Option<String>>>,
) -> Result<(), InvalidDocument> {
    match values {
        None => Err(InvalidDocument(format!("{name} is required"))),
        Some(values) if values.iter().any(Option::is_none) => {
            Err(InvalidDocument(format!("{name} must not contain null entries")))
        }
        Some(_) => Ok(()),
    }
}
