//! Outbound HTTP transport.
//!
//! Every call the relying party makes (discovery, JWKS, token endpoint,
//! userinfo) goes through [`HttpClient`], which enforces the URL scheme
//! policy, a bounded deadline and a response size limit on top of a
//! pluggable [`HttpTransport`]. [`ReqwestTransport`] is the production
//! transport; tests substitute their own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::config::HttpConfig;

/// Errors raised while talking to a remote endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the response could not be read.
    #[error("Network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-success status.
    #[error("HTTP error: status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, kept for OAuth error parsing.
        body: String,
    },

    /// The call did not complete within the configured deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The URL scheme is not allowed (only HTTPS unless `allow_http`).
    #[error("Invalid URL scheme for {0}: only HTTPS is allowed")]
    InvalidScheme(String),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, names lowercased.
    pub headers: HashMap<String, String>,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response with the given status and body and no headers.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Looks up a header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Turns a non-success status into [`TransportError::Status`].
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Status` carrying the body if the status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Status {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// The GET/POST capability the relying party needs from an HTTP stack.
///
/// Implementations handle TLS, connection pooling and any wire-level
/// retries. Non-success statuses are returned as responses, not errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Performs a GET, optionally with a bearer token.
    async fn get(&self, url: &Url, bearer: Option<&str>) -> Result<HttpResponse, TransportError>;

    /// Performs a form-encoded POST.
    async fn post_form(
        &self,
        url: &Url,
        params: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_response_size: usize,
}

impl ReqwestTransport {
    /// Builds a transport whose connections are bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Network` if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self::from_client(client))
    }

    /// Wraps an existing `reqwest` client.
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_response_size: HttpConfig::default().max_response_size,
        }
    }

    /// Sets the largest body read from the wire.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Buffers the response, giving up as soon as the body exceeds
    /// `max_response_size`.
    async fn read(&self, mut response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let too_large = || TransportError::ResponseTooLarge {
            max_size: self.max_response_size,
        };
        if response
            .content_length()
            .is_some_and(|len| len > self.max_response_size as u64)
        {
            return Err(too_large());
        }

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let mut buf = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?
        {
            if buf.len() + chunk.len() > self.max_response_size {
                return Err(too_large());
            }
            buf.extend_from_slice(&chunk);
        }
        let body = String::from_utf8(buf)
            .map_err(|_| TransportError::Network("response body is not valid UTF-8".to_string()))?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &Url, bearer: Option<&str>) -> Result<HttpResponse, TransportError> {
        let mut request = self
            .client
            .get(url.as_str())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        self.read(response).await
    }

    async fn post_form(
        &self,
        url: &Url,
        params: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .post(url.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        self.read(response).await
    }
}

/// Policy-enforcing front of an [`HttpTransport`].
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
    allow_http: bool,
    max_response_size: usize,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("timeout", &self.timeout)
            .field("allow_http", &self.allow_http)
            .field("max_response_size", &self.max_response_size)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Wraps a transport with the limits from `config`.
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, config: &HttpConfig) -> Self {
        Self {
            transport,
            timeout: config.request_timeout,
            allow_http: config.allow_http,
            max_response_size: config.max_response_size,
        }
    }

    /// Builds a client over a [`ReqwestTransport`].
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying `reqwest` client cannot be built.
    pub fn from_config(config: &HttpConfig) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(config.request_timeout)?
            .with_max_response_size(config.max_response_size);
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Whether plain `http` URLs are accepted.
    #[must_use]
    pub fn allow_http(&self) -> bool {
        self.allow_http
    }

    /// GET `url` and return the buffered response.
    ///
    /// # Errors
    ///
    /// Fails on a disallowed scheme, network failure, deadline expiry or an
    /// oversized body.
    pub async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        self.check_scheme(url)?;
        let response = self.bounded(self.transport.get(url, None)).await?;
        self.check_size(response)
    }

    /// GET `url` with `Authorization: Bearer <token>`.
    ///
    /// # Errors
    ///
    /// Same as [`HttpClient::get`].
    pub async fn get_with_bearer(
        &self,
        url: &Url,
        token: &str,
    ) -> Result<HttpResponse, TransportError> {
        self.check_scheme(url)?;
        let response = self.bounded(self.transport.get(url, Some(token))).await?;
        self.check_size(response)
    }

    /// POST `params` form-encoded to `url`.
    ///
    /// # Errors
    ///
    /// Same as [`HttpClient::get`].
    pub async fn post_form(
        &self,
        url: &Url,
        params: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        self.check_scheme(url)?;
        let response = self
            .bounded(self.transport.post_form(url, params))
            .await?;
        self.check_size(response)
    }

    async fn bounded<F>(&self, call: F) -> Result<HttpResponse, TransportError>
    where
        F: std::future::Future<Output = Result<HttpResponse, TransportError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }

    fn check_scheme(&self, url: &Url) -> Result<(), TransportError> {
        match url.scheme() {
            "https" => Ok(()),
            "http" if self.allow_http => Ok(()),
            _ => Err(TransportError::InvalidScheme(url.to_string())),
        }
    }

    fn check_size(&self, response: HttpResponse) -> Result<HttpResponse, TransportError> {
        if response.body.len() > self.max_response_size {
            return Err(TransportError::ResponseTooLarge {
                max_size: self.max_response_size,
            });
        }
        Ok(response)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct SlowTransport;

    #[async_trait]
    impl HttpTransport for SlowTransport {
        async fn get(&self, _: &Url, _: Option<&str>) -> Result<HttpResponse, TransportError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(HttpResponse::new(200, "late"))
        }

        async fn post_form(
            &self,
            _: &Url,
            _: &[(&str, &str)],
        ) -> Result<HttpResponse, TransportError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(HttpResponse::new(200, "late"))
        }
    }

    #[test]
    fn test_response_helpers() {
        let response = HttpResponse::new(200, "{}").with_header("Cache-Control", "max-age=60");
        assert!(response.is_success());
        assert_eq!(response.header("cache-control"), Some("max-age=60"));

        let err = HttpResponse::new(400, "bad").error_for_status().unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_rejects_plain_http_by_default() {
        let client = HttpClient::new(Arc::new(MockTransport::new()), &HttpConfig::default());
        let url = Url::parse("http://idp.example.com/jwks").unwrap();
        let err = client.get(&url).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidScheme(_)));
    }

    #[tokio::test]
    async fn test_deadline_is_enforced() {
        let config = HttpConfig::default().with_request_timeout(Duration::from_millis(20));
        let client = HttpClient::new(Arc::new(SlowTransport), &config);
        let url = Url::parse("https://idp.example.com/slow").unwrap();
        let err = client.get(&url).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            "https://idp.example.com/big",
            HttpResponse::new(200, "x".repeat(64)),
        );
        let config = HttpConfig::default().with_max_response_size(16);
        let client = HttpClient::new(transport, &config);
        let url = Url::parse("https://idp.example.com/big").unwrap();
        let err = client.get(&url).await.unwrap_err();
        assert!(matches!(err, TransportError::ResponseTooLarge { max_size: 16 }));
    }

    #[tokio::test]
    async fn test_reqwest_transport_get_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("cache-control", "max-age=120")
                    .set_body_string(r#"{"sub":"1"}"#),
            )
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}/userinfo", server.uri())).unwrap();
        let response = transport.get(&url, Some("abc")).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"sub":"1"}"#);
        assert_eq!(response.header("Cache-Control"), Some("max-age=120"));
    }

    #[tokio::test]
    async fn test_reqwest_transport_post_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}/token", server.uri())).unwrap();
        let response = transport
            .post_form(&url, &[("grant_type", "refresh_token")])
            .await
            .unwrap();

        assert_eq!(response.status, 400);
        assert!(response.body.contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_reqwest_transport_caps_declared_length() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_string("k".repeat(4096)))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5))
            .unwrap()
            .with_max_response_size(1024);
        let url = Url::parse(&format!("{}/jwks", server.uri())).unwrap();
        let err = transport.get(&url, None).await.unwrap_err();
        assert!(matches!(err, TransportError::ResponseTooLarge { max_size: 1024 }));

        let roomy = ReqwestTransport::new(Duration::from_secs(5))
            .unwrap()
            .with_max_response_size(8192);
        assert_eq!(roomy.get(&url, None).await.unwrap().body.len(), 4096);
    }

    #[tokio::test]
    async fn test_client_from_config_applies_size_cap_on_the_wire() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_string("d".repeat(2048)))
            .mount(&server)
            .await;

        let config = HttpConfig::default()
            .with_allow_http(true)
            .with_max_response_size(512);
        let client = HttpClient::from_config(&config).unwrap();
        let url = Url::parse(&format!("{}/.well-known/openid-configuration", server.uri())).unwrap();
        let err = client.get(&url).await.unwrap_err();
        assert!(matches!(err, TransportError::ResponseTooLarge { max_size: 512 }));
    }
}
