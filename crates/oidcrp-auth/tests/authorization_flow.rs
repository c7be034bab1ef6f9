//! End-to-end authorization code flow against a mock provider.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use oidcrp_auth::config::HttpConfig;
use oidcrp_auth::error::{ERROR_INVALID_STATE, ERROR_RETRIEVING_AN_AUTHORIZATION_CODE};
use oidcrp_auth::{
    CallbackOutcome, CallbackRequest, DataClientRegistry, FlowController, FlowStateStore,
    HttpClient, InMemoryFlowStateStore, RpConfig, UserInfoDataClient,
};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RSA_PEM: &str = include_str!("fixtures/rsa_private.pem");
const JWKS: &str = include_str!("fixtures/jwks.json");
const SESSION: &str = "session-1";

fn config(provider: &str) -> RpConfig {
    RpConfig::from_toml_str(&format!(
        r#"
[http]
request_timeout = "5s"
allow_http = true

[callback]
base_url = "https://rp.example.com/"
error_page = "error"

[[handlers]]
name = "main"
default = true
data_client = "userinfo"

[handlers.client]
client_id = "abc"
client_secret = "s3cr3t"
scopes = ["profile", "openid"]
pkce = true

[handlers.server]
authorization_endpoint = "{provider}/authorize"
token_endpoint = "{provider}/token"
jwks_endpoint = "{provider}/jwks"
userinfo_endpoint = "{provider}/userinfo"
signing_algorithms = ["RS256"]
"#
    ))
    .expect("valid config")
}

fn controller(config: &RpConfig, store: Arc<InMemoryFlowStateStore>) -> FlowController {
    let http = HttpClient::from_config(&HttpConfig::default().with_allow_http(true))
        .expect("http client");
    let data_clients = DataClientRegistry::new()
        .with_client(Arc::new(UserInfoDataClient::new("userinfo", http)));
    FlowController::from_config(config, data_clients, store).expect("controller")
}

fn id_token(nonce: &str) -> String {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("rp-test-key".to_string());
    jsonwebtoken::encode(
        &header,
        &json!({
            "iss": "https://idp.example.com",
            "sub": "YWxhY3JpdMOp",
            "aud": "abc",
            "nonce": nonce,
            "idp": "dgfip",
            "acr": "eidas2",
            "iat": now,
            "exp": now + 600
        }),
        &EncodingKey::from_rsa_pem(RSA_PEM.as_bytes()).expect("rsa key"),
    )
    .expect("signed token")
}

fn query(url: &Url, name: &str) -> String {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| panic!("missing {name} in {url}"))
}

#[tokio::test]
async fn authorization_code_flow_end_to_end() {
    let provider = MockServer::start().await;
    let store = Arc::new(InMemoryFlowStateStore::new());
    let controller = controller(&config(&provider.uri()), store.clone());

    // Idle -> AuthorizationRequested
    let outcome = controller.dispatch(SESSION, &CallbackRequest::default()).await;
    let redirect = outcome.redirect_url().expect("redirect").clone();
    assert!(redirect.as_str().starts_with(&format!("{}/authorize?", provider.uri())));
    assert!(redirect.as_str().contains("response_type=code&scope=openid+profile"));
    assert_eq!(query(&redirect, "client_id"), "abc");
    assert_eq!(query(&redirect, "code_challenge_method"), "S256");

    let state = query(&redirect, "state");
    let nonce = query(&redirect, "nonce");
    let redirect_uri = query(&redirect, "redirect_uri");
    assert_eq!(
        redirect_uri,
        "https://rp.example.com/servlet/plugins/oauth2/callback?data_client=userinfo&handler_name=main"
    );
    let pending = store.get(SESSION, "oauth2.main").await.unwrap().expect("stored");
    assert_eq!(pending.state, state);
    assert_eq!(pending.nonce, nonce);

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt-1",
            "id_token": id_token(&nonce)
        })))
        .expect(1)
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "max-age=600")
                .set_body_string(JWKS),
        )
        .expect(1)
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "YWxhY3JpdMOp",
            "given_name": "Angela"
        })))
        .expect(1)
        .mount(&provider)
        .await;

    // CallbackReceived -> Success
    let callback = CallbackRequest::from_query(&format!(
        "code=auth-code-1&state={state}&handler_name=main"
    ));
    let outcome = controller.dispatch(SESSION, &callback).await;

    let CallbackOutcome::Content { body, .. } = outcome else {
        panic!("expected userinfo content");
    };
    let userinfo: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(userinfo["given_name"], "Angela");
    assert!(store.is_empty());
}

#[tokio::test]
async fn state_mismatch_never_reaches_token_endpoint() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&provider)
        .await;
    let store = Arc::new(InMemoryFlowStateStore::new());
    let controller = controller(&config(&provider.uri()), store);

    controller.dispatch(SESSION, &CallbackRequest::default()).await;
    let callback = CallbackRequest::from_query("code=auth-code-1&state=forged");
    let outcome = controller.dispatch(SESSION, &callback).await;

    assert_eq!(
        outcome.redirect_url().unwrap().as_str(),
        format!("https://rp.example.com/error?error={ERROR_INVALID_STATE}")
    );
}

#[tokio::test]
async fn provider_error_redirects_to_error_page() {
    let provider = MockServer::start().await;
    let store = Arc::new(InMemoryFlowStateStore::new());
    let controller = controller(&config(&provider.uri()), store.clone());

    controller.dispatch(SESSION, &CallbackRequest::default()).await;
    let outcome = controller
        .dispatch(SESSION, &CallbackRequest::from_query("error=access_denied"))
        .await;

    assert_eq!(
        outcome.redirect_url().unwrap().as_str(),
        format!("https://rp.example.com/error?error={ERROR_RETRIEVING_AN_AUTHORIZATION_CODE}")
    );
    assert!(store.is_empty());
}

#[tokio::test]
async fn rejected_id_token_redirects_to_error_page() {
    let provider = MockServer::start().await;
    let store = Arc::new(InMemoryFlowStateStore::new());
    let controller = controller(&config(&provider.uri()), store);

    let outcome = controller.dispatch(SESSION, &CallbackRequest::default()).await;
    let state = query(outcome.redirect_url().unwrap(), "state");

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "id_token": id_token("replayed-nonce")
        })))
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
        .mount(&provider)
        .await;

    let callback = CallbackRequest::from_query(&format!("code=auth-code-1&state={state}"));
    let outcome = controller.dispatch(SESSION, &callback).await;

    assert_eq!(
        outcome.redirect_url().unwrap().as_str(),
        "https://rp.example.com/error?error=ERROR_INVALID_TOKEN"
    );
}
