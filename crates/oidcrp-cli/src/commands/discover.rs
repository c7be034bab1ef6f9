use anyhow::{Context, Result};
use oidcrp_auth::config::HttpConfig;
use oidcrp_auth::{DiscoveryClient, HttpClient, OidcDiscoveryDocument};
use serde_json::{Value, json};

use crate::cli::{DiscoverArgs, OutputFormat};
use crate::output::print_value;

pub async fn discover(args: &DiscoverArgs, format: OutputFormat) -> Result<()> {
    let http = HttpClient::from_config(&HttpConfig::default().with_allow_http(args.allow_http))?;
    let document = DiscoveryClient::new(http)
        .fetch(&args.issuer)
        .await
        .with_context(|| format!("Discovery failed for {}", args.issuer))?;

    print_value(&describe(&document)?, format);
    Ok(())
}

/// The document plus what it means for a relying party.
fn describe(document: &OidcDiscoveryDocument) -> Result<Value> {
    let mut value = serde_json::to_value(document)?;
    value["capabilities"] = json!({
        "pkce_s256": document.supports_pkce_method("S256"),
        "authorization_code": document.supports_grant_type("authorization_code"),
        "refresh_token": document.supports_grant_type("refresh_token"),
        "end_session": document.end_session_endpoint.is_some(),
    });
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_reports_capabilities() {
        let document: OidcDiscoveryDocument = serde_json::from_value(json!({
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/authorize",
            "token_endpoint": "https://idp.example.com/token",
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "code_challenge_methods_supported": ["S256"]
        }))
        .unwrap();

        let value = describe(&document).unwrap();
        assert_eq!(value["issuer"], "https://idp.example.com");
        assert_eq!(value["capabilities"]["pkce_s256"], true);
        assert_eq!(value["capabilities"]["refresh_token"], true);
        assert_eq!(value["capabilities"]["end_session"], false);
    }

    #[test]
    fn test_describe_defaults_without_grant_types() {
        let document: OidcDiscoveryDocument = serde_json::from_value(json!({
            "issuer": "https://idp.example.com"
        }))
        .unwrap();

        let capabilities = describe(&document).unwrap()["capabilities"].clone();
        assert_eq!(capabilities["authorization_code"], true);
        assert_eq!(capabilities["refresh_token"], false);
        assert_eq!(capabilities["pkce_s256"], false);
    }
}
