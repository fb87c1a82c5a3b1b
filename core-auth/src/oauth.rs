//! OAuth 2.0 Token Refresh
//!
//! Implements the `refresh_token` grant (RFC 6749 §6) against an identity
//! provider's token endpoint.
//!
//! # Overview
//!
//! - [`TokenRefresher`] is the seam the lifecycle manager calls through, so
//!   tests and alternative providers can stand in for the network.
//! - [`OAuthRefreshClient`] is the default implementation over
//!   [`HttpClient`]. Client errors (4xx) fail immediately because retrying a
//!   revoked grant cannot succeed; server errors (5xx) are retried with
//!   bounded exponential backoff.
//!
//! # Security
//!
//! - Token values are never logged
//! - ID token claims are decoded without signature verification; the token
//!   comes straight from the token endpoint over TLS and is only used for
//!   display and audit identity

use crate::error::{AuthError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, RetryPolicy};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Plaintext tokens returned by a successful refresh.
#[derive(Clone, Default)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub id_token: Option<String>,
    /// `None` if the provider did not rotate the refresh token
    pub refresh_token: Option<String>,
    /// Lifetime of the new access token in seconds
    pub expires_in: Option<i64>,
    /// Claims decoded from `id_token`
    pub claims: Map<String, Value>,
}

impl fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("access_token", &"[REDACTED]")
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Exchanges a refresh token for a new token set.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Perform one refresh.
    ///
    /// # Errors
    ///
    /// - [`AuthError::RefreshRejected`] if the endpoint refused the grant
    /// - [`AuthError::RefreshUnavailable`] if the endpoint could not be reached
    /// - [`AuthError::InvalidTokenResponse`] if the response was unusable
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens>;
}

/// Token endpoint configuration.
#[derive(Clone)]
pub struct OAuthRefreshConfig {
    pub token_url: String,
    pub client_id: String,
    /// Absent for public clients
    pub client_secret: Option<String>,
    pub retry: RetryPolicy,
}

impl OAuthRefreshConfig {
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

impl fmt::Debug for OAuthRefreshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthRefreshConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("retry", &self.retry)
            .finish()
    }
}

/// Default [`TokenRefresher`] speaking the OAuth 2.0 refresh grant.
pub struct OAuthRefreshClient {
    config: OAuthRefreshConfig,
    http_client: Arc<dyn HttpClient>,
}

impl OAuthRefreshClient {
    pub fn new(config: OAuthRefreshConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
        }
    }

    fn encode_body(&self, refresh_token: &str) -> Result<String> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        serde_urlencoded::to_string(&params)
            .map_err(|e| AuthError::InvalidTokenResponse(format!("Failed to encode token request: {}", e)))
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefreshClient {
    #[instrument(skip(self, refresh_token), fields(token_url = %self.config.token_url))]
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let body = self.encode_body(refresh_token)?;
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, "Refreshing access token");

            let request = HttpRequest::new(HttpMethod::Post, self.config.token_url.clone())
                .header("Accept", "application/json")
                .form(body.clone());

            let response = self
                .http_client
                .execute(request)
                .await
                .map_err(|e| AuthError::RefreshUnavailable(e.to_string()))?;

            if response.is_success() {
                let token_response: TokenResponse = response.json().map_err(|e| {
                    AuthError::InvalidTokenResponse(format!("Failed to parse token response: {}", e))
                })?;

                info!(
                    expires_in = ?token_response.expires_in,
                    rotated = token_response.refresh_token.is_some(),
                    "Access token refreshed"
                );

                return token_response.into_refreshed();
            }

            let status = response.status;

            if response.is_client_error() {
                let error = response
                    .json::<ErrorResponse>()
                    .map(|body| body.error)
                    .unwrap_or_else(|_| "unknown_error".to_string());

                warn!(status = status, error = %error, "Token refresh rejected");
                return Err(AuthError::RefreshRejected { status, error });
            }

            if attempts >= max_attempts {
                warn!(status = status, attempts = attempts, "Token refresh failed, giving up");
                return Err(AuthError::RefreshUnavailable(format!(
                    "Token endpoint returned {} after {} attempts",
                    status, attempts
                )));
            }

            let delay = self.config.retry.delay_for(attempts);
            warn!(
                status = status,
                attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                "Token refresh failed, retrying"
            );
            sleep(delay).await;
        }
    }
}

impl fmt::Debug for OAuthRefreshClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthRefreshClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Token endpoint success body.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_refreshed(self) -> Result<RefreshedTokens> {
        if self.access_token.is_empty() {
            return Err(AuthError::InvalidTokenResponse(
                "Token response has an empty access_token".to_string(),
            ));
        }

        let claims = self
            .id_token
            .as_deref()
            .map(decode_id_token_claims)
            .unwrap_or_default();

        Ok(RefreshedTokens {
            access_token: self.access_token,
            id_token: self.id_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_in: self.expires_in,
            claims,
        })
    }
}

/// Token endpoint error body (RFC 6749 §5.2).
#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Decode the payload segment of a JWT without verifying it.
///
/// Returns an empty map if the token is not a well-formed JWT.
pub fn decode_id_token_claims(id_token: &str) -> Map<String, Value> {
    let Some(payload) = id_token.split('.').nth(1) else {
        warn!("ID token is not a JWT");
        return Map::new();
    };

    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Map<String, Value>>(&bytes).ok());

    decoded.unwrap_or_else(|| {
        warn!("ID token payload could not be decoded");
        Map::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::HttpResponse;
    use bytes::Bytes;
    use mockall::mock;
    use mockall::predicate::always;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn response(status: u16, body: Value) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn jwt(claims: Value) -> String {
        format!(
            "eyJhbGciOiJSUzI1NiJ9.{}.c2lnbmF0dXJl",
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    fn client(http: MockHttp) -> OAuthRefreshClient {
        let config = OAuthRefreshConfig::new("https://idp.example.com/token", "cratedigger")
            .client_secret("s3cret")
            .retry(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                use_exponential_backoff: true,
            });
        OAuthRefreshClient::new(config, Arc::new(http))
    }

    #[tokio::test]
    async fn test_successful_refresh_decodes_claims() {
        let id_token = jwt(json!({"sub": "8f2c", "preferred_username": "digger"}));
        let body = json!({
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "id_token": id_token,
            "expires_in": 900,
            "token_type": "Bearer"
        });

        let mut http = MockHttp::new();
        http.expect_execute()
            .withf(|request| {
                let body = request
                    .body
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).to_string())
                    .unwrap_or_default();
                request.method == HttpMethod::Post
                    && request.url == "https://idp.example.com/token"
                    && body.contains("grant_type=refresh_token")
                    && body.contains("refresh_token=old-refresh")
                    && body.contains("client_secret=s3cret")
            })
            .times(1)
            .returning(move |_| Ok(response(200, body.clone())));

        let tokens = client(http).refresh("old-refresh").await.unwrap();

        assert_eq!(tokens.access_token, "new-access");
        assert_eq!(tokens.refresh_token.as_deref(), Some("new-refresh"));
        assert_eq!(tokens.expires_in, Some(900));
        assert_eq!(tokens.claims.get("preferred_username"), Some(&json!("digger")));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .with(always())
            .times(1)
            .returning(|_| Ok(response(400, json!({"error": "invalid_grant"}))));

        let err = client(http).refresh("revoked").await.unwrap_err();

        match err {
            AuthError::RefreshRejected { status, error } => {
                assert_eq!(status, 400);
                assert_eq!(error, "invalid_grant");
            }
            other => panic!("expected RefreshRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retried_until_success() {
        let mut http = MockHttp::new();
        let mut calls = 0;
        http.expect_execute().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(response(503, json!({})))
            } else {
                Ok(response(200, json!({"access_token": "fresh"})))
            }
        });

        let tokens = client(http).refresh("r").await.unwrap();

        assert_eq!(tokens.access_token, "fresh");
        assert_eq!(tokens.refresh_token, None);
        assert!(tokens.claims.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_gives_up_after_max_attempts() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(3)
            .returning(|_| Ok(response(502, json!({}))));

        let err = client(http).refresh("r").await.unwrap_err();

        assert!(matches!(err, AuthError::RefreshUnavailable(_)));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_transport_error_is_unavailable() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::OperationFailed("connection refused".to_string())));

        let err = client(http).refresh("r").await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshUnavailable(_)));
    }

    #[tokio::test]
    async fn test_malformed_success_body() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(200, json!({"token_type": "Bearer"}))));

        let err = client(http).refresh("r").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidTokenResponse(_)));
    }

    #[test]
    fn test_decode_claims_tolerates_garbage() {
        assert!(decode_id_token_claims("not-a-jwt").is_empty());
        assert!(decode_id_token_claims("a.!!!.c").is_empty());

        let claims = decode_id_token_claims(&jwt(json!({"email": "a@b.c"})));
        assert_eq!(claims.get("email"), Some(&json!("a@b.c")));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = OAuthRefreshConfig::new("https://idp", "id").client_secret("s3cret");
        assert!(!format!("{:?}", config).contains("s3cret"));

        let tokens = RefreshedTokens {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", tokens);
        assert!(!debug.contains("\"at\""));
        assert!(!debug.contains("\"rt\""));
    }
}
