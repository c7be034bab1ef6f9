//! JWT verification for ID Tokens and provider-issued data.
//!
//! [`JwtParser`] is the capability the token exchange and the data clients
//! depend on; [`JwtValidator`] is its implementation. Verification follows
//! the provider's configuration:
//!
//! - with a JWKS endpoint the key is resolved by the header `kid`,
//!   otherwise the client secret is the HMAC key
//! - with no accepted algorithms the token must be unsigned (`alg: none`);
//!   otherwise it must be signed and, once the signature checks out, its
//!   algorithm must be one of the accepted ones

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, Validation};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::jwks::KeyResolverRegistry;
use super::provider::{ClientConfig, EffectiveServerConfig};
use crate::error::{RpError, RpResult};
use crate::oauth::token::IdToken;

/// Reasons a JWT is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenValidationError {
    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Nonce mismatch: ID token nonce does not match expected nonce")]
    NonceMismatch,

    #[error("Signing algorithm {algorithm} is not accepted (accepted: {accepted:?})")]
    AlgorithmMismatch {
        /// Algorithm named in the token header.
        algorithm: String,
        /// Algorithms the provider configuration accepts.
        accepted: Vec<String>,
    },

    #[error("Token is signed but the provider is configured for unsigned tokens")]
    UnexpectedSignature,

    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    #[error("Token is missing the key ID (kid) header")]
    MissingKeyId,
}

/// Verifies provider-issued JWTs.
#[async_trait]
pub trait JwtParser: Send + Sync {
    /// Verifies an ID Token and shapes its claims.
    ///
    /// `expected_nonce` is the nonce sent with the authorization request;
    /// `None` (refresh flows) skips the nonce check.
    async fn parse_id_token(
        &self,
        id_token: &str,
        client: &ClientConfig,
        server: &EffectiveServerConfig,
        expected_nonce: Option<&str>,
    ) -> RpResult<IdToken>;

    /// Verifies an arbitrary JWT and returns its claims untouched.
    async fn parse_claims(
        &self,
        jwt: &str,
        client: &ClientConfig,
        server: &EffectiveServerConfig,
    ) -> RpResult<Map<String, Value>>;
}

/// Signature-verifying [`JwtParser`].
pub struct JwtValidator {
    keys: Arc<KeyResolverRegistry>,
    clock_skew: Duration,
}

impl JwtValidator {
    /// Creates a validator resolving JWKS keys through `keys`.
    #[must_use]
    pub fn new(keys: Arc<KeyResolverRegistry>, clock_skew: Duration) -> Self {
        Self { keys, clock_skew }
    }

    async fn verify(
        &self,
        jwt: &str,
        client: &ClientConfig,
        server: &EffectiveServerConfig,
        require_exp: bool,
    ) -> RpResult<Map<String, Value>> {
        let segments: Vec<&str> = jwt.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = segments[..] else {
            return Err(malformed("expected three dot-separated segments"));
        };
        let header = decode_segment(header_b64)?;
        let alg = header
            .get("alg")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("header has no alg"))?;
        let unsigned = alg.eq_ignore_ascii_case("none");

        if server.signing_algorithms.is_empty() {
            if !unsigned || !signature_b64.is_empty() {
                return Err(TokenValidationError::UnexpectedSignature.into());
            }
            let claims = decode_segment(payload_b64)?;
            self.check_expiry(&claims, require_exp)?;
            return Ok(claims);
        }

        if unsigned {
            return Err(TokenValidationError::UnsupportedAlgorithm(alg.to_string()).into());
        }

        let header = jsonwebtoken::decode_header(jwt).map_err(map_jwt_error)?;
        let (key, algorithm) = match &server.jwks_endpoint {
            Some(jwks_uri) => {
                let resolved = self.keys.resolve(jwks_uri, header.kid.as_deref()).await?;
                (resolved.key, resolved.algorithm.unwrap_or(header.alg))
            }
            None => {
                let secret = client.client_secret.as_deref().ok_or_else(|| {
                    RpError::Config(format!(
                        "client {} has no secret to verify {alg} tokens",
                        client.client_id
                    ))
                })?;
                (DecodingKey::from_secret(secret.as_bytes()), header.alg)
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        validation.leeway = self.clock_skew.as_secs();
        validation.required_spec_claims = if require_exp {
            HashSet::from(["exp".to_string()])
        } else {
            HashSet::new()
        };

        let data = jsonwebtoken::decode::<Map<String, Value>>(jwt, &key, &validation)
            .map_err(map_jwt_error)?;

        let algorithm = format!("{:?}", data.header.alg);
        if !server
            .signing_algorithms
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(&algorithm))
        {
            return Err(TokenValidationError::AlgorithmMismatch {
                algorithm,
                accepted: server.signing_algorithms.clone(),
            }
            .into());
        }

        Ok(data.claims)
    }

    fn check_expiry(&self, claims: &Map<String, Value>, require_exp: bool) -> RpResult<()> {
        match claims.get("exp").and_then(Value::as_i64) {
            Some(exp) => {
                let leeway = i64::try_from(self.clock_skew.as_secs()).unwrap_or(i64::MAX);
                let now = OffsetDateTime::now_utc().unix_timestamp();
                if exp.saturating_add(leeway) < now {
                    return Err(TokenValidationError::Expired.into());
                }
                Ok(())
            }
            None if require_exp => Err(malformed("missing required claim: exp")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl JwtParser for JwtValidator {
    async fn parse_id_token(
        &self,
        id_token: &str,
        client: &ClientConfig,
        server: &EffectiveServerConfig,
        expected_nonce: Option<&str>,
    ) -> RpResult<IdToken> {
        let claims = self
            .verify(id_token, client, server, true)
            .await
            .inspect_err(|e| tracing::warn!(client_id = %client.client_id, error = %e, "Rejected ID token"))?;

        if let Some(expected) = expected_nonce {
            let nonce = claims.get("nonce").and_then(Value::as_str);
            if nonce != Some(expected) {
                tracing::warn!(client_id = %client.client_id, "ID token nonce mismatch");
                return Err(TokenValidationError::NonceMismatch.into());
            }
        }

        let id_token = IdToken::from_claims(claims);
        tracing::debug!(
            client_id = %client.client_id,
            issuer = ?id_token.issuer,
            "Validated ID token"
        );
        Ok(id_token)
    }

    async fn parse_claims(
        &self,
        jwt: &str,
        client: &ClientConfig,
        server: &EffectiveServerConfig,
    ) -> RpResult<Map<String, Value>> {
        self.verify(jwt, client, server, false).await
    }
}

fn malformed(reason: impl Into<String>) -> RpError {
    TokenValidationError::Malformed(reason.into()).into()
}

fn decode_segment(segment: &str) -> RpResult<Map<String, Value>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| malformed(format!("invalid base64url segment: {e}")))?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(malformed("segment is not a JSON object")),
        Err(e) => Err(malformed(format!("invalid JSON segment: {e}"))),
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> RpError {
    let reason = match err.kind() {
        ErrorKind::InvalidSignature => TokenValidationError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenValidationError::Expired,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            TokenValidationError::UnsupportedAlgorithm(err.to_string())
        }
        ErrorKind::InvalidKeyFormat | ErrorKind::InvalidEcdsaKey => {
            return RpError::Config(format!("unusable verification key: {err}"));
        }
        _ => TokenValidationError::Malformed(err.to_string()),
    };
    reason.into()
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Token minting helpers shared by the unit tests.

    use jsonwebtoken::{Algorithm, EncodingKey, Header};
    use serde_json::{Value, json};

    pub const SECRET: &str = "7504f9f0ef08473a4c26873e9c1b898e567a39e6b76b7e60e93a0cb25cae5eb8";
    pub const CLIENT_ID: &str = "895fae591ccae777094931e269e46447";
    pub const NONCE: &str = "12344354597459";
    pub const RSA_PEM: &str = include_str!("../../tests/fixtures/rsa_private.pem");

    pub fn now() -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp()
    }

    pub fn claims(nonce: &str) -> Value {
        json!({
            "iss": "http://franceconnect.gouv.fr",
            "sub": "YWxhY3JpdMOp",
            "aud": CLIENT_ID,
            "nonce": nonce,
            "idp": "dgfip",
            "acr": "eidas2",
            "iat": now(),
            "exp": now() + 3600
        })
    }

    pub fn hs512(claims: &Value, secret: &str) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    pub fn rs256(claims: &Value, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        jsonwebtoken::encode(
            &header,
            claims,
            &EncodingKey::from_rsa_pem(RSA_PEM.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    pub fn unsigned(claims: &Value) -> String {
        use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::JwksConfig;
    use crate::http::HttpResponse;
    use crate::http::testing::{self, MockTransport};
    use url::Url;

    const JWKS_URI: &str = "https://idp.example.com/jwks";

    fn validator(transport: Arc<MockTransport>) -> JwtValidator {
        let keys = KeyResolverRegistry::new(testing::client(transport), JwksConfig::default());
        JwtValidator::new(Arc::new(keys), Duration::from_secs(60))
    }

    fn client() -> ClientConfig {
        ClientConfig::new(CLIENT_ID).with_client_secret(SECRET)
    }

    fn server(algorithms: &[&str]) -> EffectiveServerConfig {
        EffectiveServerConfig {
            issuer: None,
            authorization_endpoint: Url::parse("https://idp.example.com/authorize").unwrap(),
            token_endpoint: Url::parse("https://idp.example.com/token").unwrap(),
            end_session_endpoint: None,
            jwks_endpoint: None,
            userinfo_endpoint: None,
            enable_jwt_validation: true,
            signing_algorithms: algorithms.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn jwks_server() -> EffectiveServerConfig {
        let mut server = server(&["RS256"]);
        server.jwks_endpoint = Some(Url::parse(JWKS_URI).unwrap());
        server
    }

    fn reason(err: RpError) -> TokenValidationError {
        match err {
            RpError::TokenValidation(reason) => reason,
            other => panic!("expected a token validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hs512_accepted() {
        let validator = validator(Arc::new(MockTransport::new()));
        let token = hs512(&claims(NONCE), SECRET);

        let id = validator
            .parse_id_token(&token, &client(), &server(&["HS512"]), Some(NONCE))
            .await
            .unwrap();

        assert_eq!(id.issuer.as_deref(), Some("http://franceconnect.gouv.fr"));
        assert_eq!(id.subject.as_deref(), Some("YWxhY3JpdMOp"));
        assert_eq!(id.audience, vec![CLIENT_ID.to_string()]);
        assert_eq!(id.identity_provider.as_deref(), Some("dgfip"));
        assert_eq!(id.acr.as_deref(), Some("eidas2"));
        assert_eq!(id.nonce.as_deref(), Some(NONCE));
        assert!(id.expiration.is_some());
    }

    #[tokio::test]
    async fn test_algorithm_not_accepted() {
        let validator = validator(Arc::new(MockTransport::new()));
        let token = hs512(&claims(NONCE), SECRET);

        let err = validator
            .parse_id_token(&token, &client(), &server(&["HS256"]), Some(NONCE))
            .await
            .unwrap_err();

        assert!(matches!(
            reason(err),
            TokenValidationError::AlgorithmMismatch { ref algorithm, .. } if algorithm == "HS512"
        ));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let validator = validator(Arc::new(MockTransport::new()));
        let token = hs512(&claims(NONCE), &SECRET.replace('7', "8"));

        let err = validator
            .parse_id_token(&token, &client(), &server(&["HS512"]), Some(NONCE))
            .await
            .unwrap_err();

        assert_eq!(reason(err), TokenValidationError::InvalidSignature);
    }

    #[tokio::test]
    async fn test_unsigned_rejected_when_algorithms_configured() {
        let validator = validator(Arc::new(MockTransport::new()));
        let token = unsigned(&claims(NONCE));

        let err = validator
            .parse_id_token(&token, &client(), &server(&["HS512"]), Some(NONCE))
            .await
            .unwrap_err();

        assert!(matches!(
            reason(err),
            TokenValidationError::UnsupportedAlgorithm(_)
        ));
    }

    #[tokio::test]
    async fn test_unsigned_mode() {
        let validator = validator(Arc::new(MockTransport::new()));

        let id = validator
            .parse_id_token(&unsigned(&claims(NONCE)), &client(), &server(&[]), Some(NONCE))
            .await
            .unwrap();
        assert_eq!(id.acr.as_deref(), Some("eidas2"));

        let err = validator
            .parse_id_token(&hs512(&claims(NONCE), SECRET), &client(), &server(&[]), Some(NONCE))
            .await
            .unwrap_err();
        assert_eq!(reason(err), TokenValidationError::UnexpectedSignature);
    }

    #[tokio::test]
    async fn test_unsigned_mode_checks_expiry() {
        let validator = validator(Arc::new(MockTransport::new()));
        let mut expired = claims(NONCE);
        expired["exp"] = (now() - 3600).into();

        let err = validator
            .parse_id_token(&unsigned(&expired), &client(), &server(&[]), Some(NONCE))
            .await
            .unwrap_err();
        assert_eq!(reason(err), TokenValidationError::Expired);
    }

    #[tokio::test]
    async fn test_nonce_checks() {
        let validator = validator(Arc::new(MockTransport::new()));
        let server = server(&["HS512"]);

        let token = hs512(&claims("another-nonce"), SECRET);
        let err = validator
            .parse_id_token(&token, &client(), &server, Some(NONCE))
            .await
            .unwrap_err();
        assert_eq!(reason(err), TokenValidationError::NonceMismatch);

        let mut without = claims(NONCE);
        without.as_object_mut().unwrap().remove("nonce");
        let token = hs512(&without, SECRET);
        let err = validator
            .parse_id_token(&token, &client(), &server, Some(NONCE))
            .await
            .unwrap_err();
        assert_eq!(reason(err), TokenValidationError::NonceMismatch);

        // Refresh flows carry no nonce to compare against.
        assert!(
            validator
                .parse_id_token(&token, &client(), &server, None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let validator = validator(Arc::new(MockTransport::new()));
        let mut expired = claims(NONCE);
        expired["exp"] = (now() - 3600).into();

        let err = validator
            .parse_id_token(&hs512(&expired, SECRET), &client(), &server(&["HS512"]), Some(NONCE))
            .await
            .unwrap_err();
        assert_eq!(reason(err), TokenValidationError::Expired);
    }

    #[tokio::test]
    async fn test_malformed_token() {
        let validator = validator(Arc::new(MockTransport::new()));
        for token in ["abc", "a.b", "!!!.e30.sig"] {
            let err = validator
                .parse_id_token(token, &client(), &server(&["HS512"]), Some(NONCE))
                .await
                .unwrap_err();
            assert!(matches!(reason(err), TokenValidationError::Malformed(_)));
        }
    }

    #[tokio::test]
    async fn test_rs256_via_jwks() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            JWKS_URI,
            HttpResponse::new(200, include_str!("../../tests/fixtures/jwks.json")),
        );
        let validator = validator(transport.clone());

        let id = validator
            .parse_id_token(&rs256(&claims(NONCE), "rp-test-key"), &client(), &jwks_server(), Some(NONCE))
            .await
            .unwrap();
        assert_eq!(id.subject.as_deref(), Some("YWxhY3JpdMOp"));

        let err = validator
            .parse_id_token(&rs256(&claims(NONCE), "retired-key"), &client(), &jwks_server(), Some(NONCE))
            .await
            .unwrap_err();
        assert_eq!(
            reason(err),
            TokenValidationError::KeyNotFound("retired-key".to_string())
        );
    }

    #[tokio::test]
    async fn test_unreachable_jwks_is_config_error() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(JWKS_URI, HttpResponse::new(502, "bad gateway"));
        let validator = validator(transport);

        let err = validator
            .parse_id_token(&rs256(&claims(NONCE), "rp-test-key"), &client(), &jwks_server(), Some(NONCE))
            .await
            .unwrap_err();
        assert!(matches!(err, RpError::Config(_)));
    }

    #[tokio::test]
    async fn test_parse_claims_skips_nonce() {
        let validator = validator(Arc::new(MockTransport::new()));
        let mut data = claims("irrelevant");
        data.as_object_mut().unwrap().remove("exp");
        data["given_name"] = "Angela".into();

        let claims = validator
            .parse_claims(&hs512(&data, SECRET), &client(), &server(&["HS512"]))
            .await
            .unwrap();
        assert_eq!(claims["given_name"], "Angela");
        assert_eq!(claims["nonce"], "irrelevant");
    }

    #[tokio::test]
    async fn test_hmac_requires_secret() {
        let validator = validator(Arc::new(MockTransport::new()));
        let public = ClientConfig::new(CLIENT_ID).with_public(true);

        let err = validator
            .parse_id_token(&hs512(&claims(NONCE), SECRET), &public, &server(&["HS512"]), Some(NONCE))
            .await
            .unwrap_err();
        assert!(matches!(err, RpError::Config(_)));
    }
}
