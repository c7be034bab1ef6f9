//! Outbound authorization request.
//!
//! Builds the URL the user agent is redirected to in order to obtain an
//! authorization code:
//!
//! ```text
//! GET /authorize?
//!   response_type=code
//!   &scope=openid+profile
//!   &client_id=abc
//!   &redirect_uri=https%3A%2F%2Frp.example.com%2Fcallback
//!   &state=...
//!   &nonce=...
//!   &acr_values=eidas1
//!   &code_challenge=...
//!   &code_challenge_method=S256
//! ```

use url::Url;

use super::pkce::{PkceChallenge, PkceChallengeMethod};
use crate::federation::provider::ClientConfig;

pub const RESPONSE_TYPE_CODE: &str = "code";
pub const PARAMETER_BACK_PROMPT_URL: &str = "back_prompt_url";

/// Parameters of one authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub client: &'a ClientConfig,
    /// Already-final callback URI; form-encoded once when appended.
    pub redirect_uri: &'a str,
    pub state: &'a str,
    pub nonce: &'a str,
    pub code_challenge: Option<&'a PkceChallenge>,
    /// Caller-supplied passthrough parameters, appended verbatim.
    pub extra_params: &'a [(String, String)],
    pub back_prompt_url: Option<&'a str>,
}

impl AuthorizationRequest<'_> {
    /// Appends the request parameters to `authorization_endpoint`.
    #[must_use]
    pub fn to_url(&self, authorization_endpoint: &Url) -> Url {
        let mut url = authorization_endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("response_type", RESPONSE_TYPE_CODE)
                .append_pair("scope", &self.client.scope_param())
                .append_pair("client_id", &self.client.client_id)
                .append_pair("redirect_uri", self.redirect_uri)
                .append_pair("state", self.state)
                .append_pair("nonce", self.nonce);

            if let Some(acr_values) = self.client.acr_param() {
                pairs.append_pair("acr_values", &acr_values);
            }
            if let Some(challenge) = self.code_challenge {
                pairs
                    .append_pair("code_challenge", challenge.as_str())
                    .append_pair("code_challenge_method", PkceChallengeMethod::S256.as_str());
            }
            for (name, value) in self.extra_params {
                pairs.append_pair(name, value);
            }
            if let Some(back_prompt_url) = self.back_prompt_url {
                pairs.append_pair(PARAMETER_BACK_PROMPT_URL, back_prompt_url);
            }
        }
        url
    }
}

/// Splits a `k=v&k2=v2` passthrough string into pairs.
///
/// Segments without `=` are dropped.
#[must_use]
pub fn parse_complementary_parameters(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter_map(|segment| segment.split_once('='))
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::pkce::PkceVerifier;

    fn endpoint() -> Url {
        Url::parse("https://idp.example.com/authorize").unwrap()
    }

    #[test]
    fn test_authorization_url() {
        let client = ClientConfig::new("abc").with_scopes(["openid", "profile"]);
        let request = AuthorizationRequest {
            client: &client,
            redirect_uri: "https://rp.example.com/callback?handler_name=fc",
            state: "st",
            nonce: "nc",
            code_challenge: None,
            extra_params: &[],
            back_prompt_url: None,
        };

        let url = request.to_url(&endpoint()).to_string();
        assert!(url.starts_with("https://idp.example.com/authorize?"));
        assert!(url.contains("response_type=code&scope=openid+profile"));
        assert!(url.contains("client_id=abc"));
        assert!(url.contains(
            "redirect_uri=https%3A%2F%2Frp.example.com%2Fcallback%3Fhandler_name%3Dfc"
        ));
        assert!(url.contains("state=st&nonce=nc"));
        assert!(!url.contains("acr_values"));
        assert!(!url.contains("code_challenge"));
    }

    #[test]
    fn test_optional_parameters() {
        let client = ClientConfig::new("abc").with_acr_values(["eidas1", "eidas2"]);
        let verifier = PkceVerifier::generate();
        let challenge = PkceChallenge::from_verifier(&verifier);
        let extra = vec![("ui_locales".to_string(), "fr".to_string())];
        let request = AuthorizationRequest {
            client: &client,
            redirect_uri: "https://rp.example.com/callback",
            state: "st",
            nonce: "nc",
            code_challenge: Some(&challenge),
            extra_params: &extra,
            back_prompt_url: Some("https://rp.example.com/back"),
        };

        let url = request.to_url(&endpoint());
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("acr_values"), Some("eidas1 eidas2"));
        assert_eq!(get("code_challenge"), Some(challenge.as_str()));
        assert_eq!(get("code_challenge_method"), Some("S256"));
        assert_eq!(get("ui_locales"), Some("fr"));
        assert_eq!(get("back_prompt_url"), Some("https://rp.example.com/back"));
        assert!(url.as_str().contains("acr_values=eidas1+eidas2"));
    }

    #[test]
    fn test_parse_complementary_parameters() {
        assert_eq!(
            parse_complementary_parameters("a=1&flag&b=two"),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two".to_string())
            ]
        );
        assert!(parse_complementary_parameters("").is_empty());
    }
}
