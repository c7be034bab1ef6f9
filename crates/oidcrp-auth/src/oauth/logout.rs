//! RP-initiated logout (OpenID Connect RP-Initiated Logout 1.0).

use url::Url;

use crate::error::{RpError, RpResult};
use crate::federation::provider::EffectiveServerConfig;

/// Builds the end-session URL the user agent is sent to on logout.
///
/// # Errors
///
/// Returns `RpError::Precondition` if the provider exposes no end-session
/// endpoint.
pub fn build_logout_url(
    server: &EffectiveServerConfig,
    id_token_hint: Option<&str>,
    post_logout_redirect_uri: Option<&Url>,
    state: Option<&str>,
) -> RpResult<Url> {
    let mut url = server.end_session_endpoint.clone().ok_or_else(|| {
        RpError::Precondition("provider has no end-session endpoint".to_string())
    })?;

    {
        let mut pairs = url.query_pairs_mut();
        if let Some(hint) = id_token_hint {
            pairs.append_pair("id_token_hint", hint);
        }
        if let Some(redirect) = post_logout_redirect_uri {
            pairs.append_pair("post_logout_redirect_uri", redirect.as_str());
        }
        if let Some(state) = state {
            pairs.append_pair("state", state);
        }
    }
    // `query_pairs_mut` leaves a bare `?` when nothing was appended.
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(end_session: Option<&str>) -> EffectiveServerConfig {
        EffectiveServerConfig {
            issuer: None,
            authorization_endpoint: Url::parse("https://idp.example.com/authorize").unwrap(),
            token_endpoint: Url::parse("https://idp.example.com/token").unwrap(),
            end_session_endpoint: end_session.map(|u| Url::parse(u).unwrap()),
            jwks_endpoint: None,
            userinfo_endpoint: None,
            enable_jwt_validation: true,
            signing_algorithms: vec![],
        }
    }

    #[test]
    fn test_logout_url() {
        let redirect = Url::parse("https://rp.example.com/bye").unwrap();
        let url = build_logout_url(
            &server(Some("https://idp.example.com/logout")),
            Some("eyJ.hint"),
            Some(&redirect),
            Some("st"),
        )
        .unwrap();

        assert_eq!(
            url.as_str(),
            "https://idp.example.com/logout?id_token_hint=eyJ.hint&post_logout_redirect_uri=https%3A%2F%2Frp.example.com%2Fbye&state=st"
        );
    }

    #[test]
    fn test_logout_url_without_parameters() {
        let url =
            build_logout_url(&server(Some("https://idp.example.com/logout")), None, None, None)
                .unwrap();
        assert_eq!(url.as_str(), "https://idp.example.com/logout");
    }

    #[test]
    fn test_missing_end_session_endpoint() {
        let err = build_logout_url(&server(None), None, None, None).unwrap_err();
        assert!(matches!(err, RpError::Precondition(_)));
    }
}
