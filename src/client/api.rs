//! Transport for the private `_sign`, `_refresh` and `_verify` endpoints.
//!
//! Cookies live in a shared jar the way a browser keeps them: the signature
//! cookie is sent along with every call but never read by the client.

use super::{authorizer::ClientFuture, error::ClientError};
use crate::{
    APP_USER_AGENT,
    types::{CookieNames, CookieScope, ErrorResponse, SignRequest, TokenRequest, TokenResponse},
};
use reqwest::cookie::{CookieStore, Jar};
use serde::Serialize;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::debug;
use url::Url;

/// Maximum number of error body characters surfaced to callers.
const MAX_ERROR_CHARS: usize = 200;

/// What the auth client needs from the network and the cookie jar.
pub trait AuthTransport: Send + Sync {
    /// Entry URL the platforms are initialized with.
    fn entry(&self) -> &str;

    fn sign<'a>(&'a self, platform: &'a str, credential: Value) -> ClientFuture<'a, Result<TokenResponse, ClientError>>;

    fn refresh<'a>(&'a self, token: &'a str) -> ClientFuture<'a, Result<TokenResponse, ClientError>>;

    /// Value of a script-readable cookie.
    fn cookie(&self, name: &str) -> Option<String>;

    /// Expire a cookie under the scope it was issued with.
    fn remove_cookie(&self, name: &str, scope: &CookieScope);
}

#[derive(Debug, Clone)]
pub struct AuthApi {
    http: reqwest::Client,
    jar: Arc<Jar>,
    entry: Url,
    cookie_names: CookieNames,
}

impl AuthApi {
    /// Build a transport with its own cookie jar.
    ///
    /// # Errors
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(entry: Url, timeout: Duration, cookie_names: CookieNames) -> Result<Self, ClientError> {
        Self::with_jar(entry, timeout, cookie_names, Arc::new(Jar::default()))
    }

    /// Build a transport over an existing cookie jar.
    ///
    /// # Errors
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn with_jar(
        entry: Url,
        timeout: Duration,
        cookie_names: CookieNames,
        jar: Arc<Jar>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .cookie_provider(jar.clone())
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Config(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self {
            http,
            jar,
            entry,
            cookie_names,
        })
    }

    #[must_use]
    pub fn entry_url(&self) -> &Url {
        &self.entry
    }

    #[must_use]
    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    #[must_use]
    pub fn cookie_names(&self) -> &CookieNames {
        &self.cookie_names
    }

    fn endpoint(&self, name: &str) -> Result<Url, ClientError> {
        let base = self.entry.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{name}"))
            .map_err(|err| ClientError::Config(format!("invalid endpoint {name}: {err}")))
    }

    /// # Errors
    /// Returns the transport failure or the server's rejection.
    pub async fn sign(&self, platform: &str, credential: Value) -> Result<TokenResponse, ClientError> {
        let body = SignRequest {
            platform: platform.to_string(),
            credential,
        };
        self.post("_sign", &body).await
    }

    /// # Errors
    /// Returns the transport failure or the server's rejection.
    pub async fn refresh(&self, token: &str) -> Result<TokenResponse, ClientError> {
        self.post(
            "_refresh",
            &TokenRequest {
                token: token.to_string(),
            },
        )
        .await
    }

    /// # Errors
    /// Returns the transport failure or the server's rejection.
    pub async fn verify(&self, token: &str) -> Result<TokenResponse, ClientError> {
        self.post(
            "_verify",
            &TokenRequest {
                token: token.to_string(),
            },
        )
        .await
    }

    async fn post<B: Serialize>(&self, name: &str, body: &B) -> Result<TokenResponse, ClientError> {
        let url = self.endpoint(name)?;
        debug!("POST {url}");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_request_error)?;
        handle_token_response(response).await
    }

    /// Value of a script-readable cookie sent to the auth entry.
    ///
    /// Only the token and error cookies are readable; the HttpOnly signature
    /// and state cookies always read as `None`.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        if name != self.cookie_names.token && name != self.cookie_names.error {
            return None;
        }
        let header = self.jar.cookies(&self.entry)?;
        let value = header.to_str().ok()?;
        value.split(';').find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name && !val.trim().is_empty()).then(|| val.trim().to_string())
        })
    }

    /// Expire a cookie under the scope it was issued with.
    pub fn remove_cookie(&self, name: &str, scope: &CookieScope) {
        let mut cookie = format!("{name}=; Max-Age=0; Path={}", scope.path);
        if let Some(domain) = &scope.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        self.jar.add_cookie_str(&cookie, &self.entry);
    }
}

impl AuthTransport for AuthApi {
    fn entry(&self) -> &str {
        self.entry.as_str()
    }

    fn sign<'a>(&'a self, platform: &'a str, credential: Value) -> ClientFuture<'a, Result<TokenResponse, ClientError>> {
        Box::pin(AuthApi::sign(self, platform, credential))
    }

    fn refresh<'a>(&'a self, token: &'a str) -> ClientFuture<'a, Result<TokenResponse, ClientError>> {
        Box::pin(AuthApi::refresh(self, token))
    }

    fn cookie(&self, name: &str) -> Option<String> {
        AuthApi::cookie(self, name)
    }

    fn remove_cookie(&self, name: &str, scope: &CookieScope) {
        AuthApi::remove_cookie(self, name, scope);
    }
}

/// Maps transport errors into `ClientError` with timeout detection.
fn map_request_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout("Request timed out.".to_string())
    } else {
        ClientError::Network(format!("Unable to reach the server: {err}"))
    }
}

/// Parses `{platform, token}` and surfaces `{error:{code,reason}}` bodies as `ClientError::Api`.
async fn handle_token_response(response: reqwest::Response) -> Result<TokenResponse, ClientError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<TokenResponse>()
            .await
            .map_err(|err| ClientError::Parse(format!("Failed to decode response: {err}")));
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(ErrorResponse { error }) => Err(ClientError::Api {
            code: error.code,
            reason: error.reason,
        }),
        Err(_) => Err(ClientError::Api {
            code: status.as_u16(),
            reason: sanitize_body(&body),
        }),
    }
}

/// Trims and truncates raw error bodies.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header_exists, method, path},
    };

    async fn api(server: &MockServer) -> Result<AuthApi> {
        let entry = Url::parse(&format!("{}/auth", server.uri()))?;
        Ok(AuthApi::new(entry, Duration::from_secs(5), CookieNames::default())?)
    }

    #[tokio::test]
    async fn sign_posts_credential_and_keeps_cookies() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/_sign"))
            .and(body_json(json!({ "platform": "foo", "credential": { "foo": "credential" } })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "crossauth_signature=sig; Path=/; HttpOnly")
                    .append_header("set-cookie", "crossauth_token=h.p; Path=/")
                    .set_body_json(json!({ "platform": "foo", "token": "h.p" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/_verify"))
            .and(header_exists("cookie"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "platform": "foo", "token": "h.p" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = api(&server).await?;
        let response = api.sign("foo", json!({ "foo": "credential" })).await?;
        assert_eq!(
            response,
            TokenResponse {
                platform: "foo".to_string(),
                token: "h.p".to_string(),
            }
        );
        assert_eq!(api.cookie("crossauth_token").as_deref(), Some("h.p"));
        assert_eq!(api.cookie("crossauth_signature"), None);

        api.verify("h.p").await?;
        Ok(())
    }

    #[tokio::test]
    async fn error_body_is_surfaced() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/_refresh"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "error": { "code": 400, "reason": "token is not refreshable" } })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/_verify"))
            .respond_with(ResponseTemplate::new(502).set_body_string("  bad gateway  "))
            .mount(&server)
            .await;

        let api = api(&server).await?;
        assert_eq!(
            api.refresh("h.p").await.err(),
            Some(ClientError::Api {
                code: 400,
                reason: "token is not refreshable".to_string(),
            })
        );
        assert_eq!(
            api.verify("h.p").await.err(),
            Some(ClientError::Api {
                code: 502,
                reason: "bad gateway".to_string(),
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn malformed_success_is_parse_error() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/_sign"))
            .respond_with(ResponseTemplate::new(200).set_body_string("nope"))
            .mount(&server)
            .await;

        let api = api(&server).await?;
        assert!(matches!(
            api.sign("foo", json!(null)).await,
            Err(ClientError::Parse(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() -> Result<()> {
        let api = AuthApi::new(
            Url::parse("http://127.0.0.1:9/auth")?,
            Duration::from_secs(2),
            CookieNames::default(),
        )?;
        let result = api.verify("h.p").await;
        assert!(
            matches!(result, Err(ClientError::Network(_) | ClientError::Timeout(_))),
            "{result:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn remove_cookie_expires_it() -> Result<()> {
        let server = MockServer::start().await;
        let api = api(&server).await?;
        api.jar()
            .add_cookie_str("crossauth_token=h.p; Path=/", api.entry_url());
        assert_eq!(api.cookie("crossauth_token").as_deref(), Some("h.p"));

        api.remove_cookie("crossauth_token", &CookieScope::default());
        assert_eq!(api.cookie("crossauth_token"), None);
        Ok(())
    }

    #[test]
    fn sanitize_body_trims_and_truncates() {
        assert_eq!(sanitize_body("   "), "Request failed.");
        assert_eq!(sanitize_body(&"x".repeat(500)).len(), MAX_ERROR_CHARS);
    }
}
