//! Terminates the auth protocol under the entry path.
//!
//! - `<entry>` itself is forbidden.
//! - `<entry>/_sign`, `<entry>/_refresh`, `<entry>/_verify` form the private JSON API.
//! - `<entry>/<platform>/...` is handed to the platform's authorizer.

use super::{
    authorizer::{ServerAuthorizer, Verification},
    config::{ConfigError, ServerConfig},
    cookies::{CookieAccessor, CookieSessionStore, RequestCookies},
};
use crate::{
    error::AuthError,
    token::{AuthPayload, IssueAuthOptions, VerifyOptions},
    types::{AuthContext, SignRequest, TokenRequest, TokenResponse},
    unix_now,
};
use axum::{
    Json,
    body::{Body, to_bytes},
    http::{
        HeaderMap, HeaderValue, Method, Request,
        header::{AUTHORIZATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use std::{
    collections::HashMap,
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};
use tracing::{debug, error, info, instrument, warn};

const SIGN: &str = "_sign";
const REFRESH: &str = "_refresh";
const VERIFY: &str = "_verify";

enum Route<'a> {
    Private(&'a str),
    Platform(&'a str),
}

pub struct ServerAuthController {
    store: Arc<CookieSessionStore>,
    authorizers: HashMap<String, Arc<dyn ServerAuthorizer>>,
}

impl std::fmt::Debug for ServerAuthController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerAuthController")
            .field("entry_path", &self.store.config().entry_path())
            .field("platforms", &self.authorizers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

async fn guarded<T>(
    platform: &str,
    operation: &str,
    future: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, AuthError> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            error!("Authorizer {platform} failed in {operation}: {err:#}");
            Err(AuthError::Internal("authorizer error".to_string()))
        }
        Err(_) => {
            error!("Authorizer {platform} panicked in {operation}");
            Err(AuthError::Internal("authorizer error".to_string()))
        }
    }
}

fn guarded_sync<T>(platform: &str, operation: &str, call: impl FnOnce() -> T) -> Result<T, AuthError> {
    catch_unwind(AssertUnwindSafe(call)).map_err(|_| {
        error!("Authorizer {platform} panicked in {operation}");
        AuthError::Internal("authorizer error".to_string())
    })
}

fn with_cookies(mut response: Response, cookies: Vec<HeaderValue>) -> Response {
    let headers = response.headers_mut();
    for cookie in cookies {
        headers.append(SET_COOKIE, cookie);
    }
    response
}

fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AuthError::Unauthorized("missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| AuthError::BadRequest("invalid auth scheme".to_string()))?
        .trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or_else(|| AuthError::BadRequest("invalid auth scheme".to_string()))?
        .trim();
    if token.is_empty() {
        return Err(AuthError::BadRequest("empty token".to_string()));
    }
    Ok(token.to_string())
}

impl ServerAuthController {
    /// Build a controller over a set of platform authorizers.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or two authorizers
    /// claim the same platform.
    pub fn new(
        config: ServerConfig,
        authorizers: Vec<Arc<dyn ServerAuthorizer>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut by_platform = HashMap::with_capacity(authorizers.len());
        for authorizer in authorizers {
            let platform = authorizer.platform().to_string();
            if platform.is_empty() || platform.starts_with('_') || platform.contains('/') {
                return Err(ConfigError::InvalidEntryPath(format!(
                    "{}/{platform}",
                    config.entry_path()
                )));
            }
            if by_platform.insert(platform.clone(), authorizer).is_some() {
                return Err(ConfigError::DuplicatePlatform(platform));
            }
        }

        Ok(Self {
            store: Arc::new(CookieSessionStore::new(Arc::new(config))),
            authorizers: by_platform,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        self.store.config()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CookieSessionStore> {
        &self.store
    }

    #[must_use]
    pub fn platforms(&self) -> Vec<&str> {
        let mut platforms: Vec<&str> = self.authorizers.keys().map(String::as_str).collect();
        platforms.sort_unstable();
        platforms
    }

    fn authorizer(&self, platform: &str) -> Result<&Arc<dyn ServerAuthorizer>, AuthError> {
        self.authorizers.get(platform).ok_or_else(|| {
            debug!("Unknown platform: {platform}");
            AuthError::RouteNotFound(format!("unknown platform \"{platform}\""))
        })
    }

    fn route<'a>(&self, path: &'a str) -> Result<Route<'a>, AuthError> {
        let entry = self.config().entry_path();
        let rest = path
            .strip_prefix(entry)
            .filter(|rest| rest.starts_with('/'))
            .ok_or_else(|| AuthError::PathForbidden("path outside auth entry".to_string()))?;
        let rest = &rest[1..];
        if rest.is_empty() {
            return Err(AuthError::PathForbidden("direct access to auth entry".to_string()));
        }

        let (segment, tail) = rest.split_once('/').unwrap_or((rest, ""));
        if segment.starts_with('_') {
            return match segment {
                SIGN | REFRESH | VERIFY if tail.is_empty() => Ok(Route::Private(segment)),
                _ => Err(AuthError::RouteNotFound(format!("unknown route \"{segment}\""))),
            };
        }
        Ok(Route::Platform(segment))
    }

    /// Handle any request under the entry path and always produce a response.
    #[instrument(skip(self, request), fields(method = %request.method(), path = %request.uri().path()))]
    pub async fn delegate_auth_request(&self, request: Request<Body>) -> Response {
        match self.handle(request).await {
            Ok(response) => response,
            Err(err) => {
                if err.code() >= 500 {
                    warn!("Auth request failed: ({}) {}", err.code(), err.reason());
                } else {
                    debug!("Auth request rejected: ({}) {}", err.code(), err.reason());
                }
                err.into_response()
            }
        }
    }

    async fn handle(&self, request: Request<Body>) -> Result<Response, AuthError> {
        let path = request.uri().path().to_string();
        match self.route(&path)? {
            Route::Private(name) => {
                if request.method() != Method::POST {
                    return Err(AuthError::MethodNotAllowed(format!(
                        "{name} only accepts POST"
                    )));
                }
                match name {
                    SIGN => self.sign(request).await,
                    REFRESH => self.refresh(request).await,
                    _ => self.verify(request).await,
                }
            }
            Route::Platform(platform) => self.delegate(platform, request).await,
        }
    }

    async fn delegate(&self, platform: &str, request: Request<Body>) -> Result<Response, AuthError> {
        let authorizer = self.authorizer(platform)?;
        let mut accessor = CookieAccessor::new(self.store.clone(), platform, request.headers());

        let response = guarded(
            platform,
            "delegate_auth_request",
            authorizer.delegate_auth_request(request, &mut accessor),
        )
        .await?;

        match response {
            Some(response) => Ok(with_cookies(response, accessor.take_cookies())),
            None => {
                warn!("Authorizer {platform} left the request unanswered");
                Err(AuthError::NotImplemented(format!(
                    "platform \"{platform}\" did not handle the request"
                )))
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, request: Request<Body>) -> Result<T, AuthError> {
        let bytes = to_bytes(request.into_body(), self.config().max_body_bytes())
            .await
            .map_err(|err| AuthError::BadRequest(format!("unreadable body: {err}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| AuthError::BadRequest(format!("malformed body: {err}")))
    }

    /// Signature cookie and body token of a `_refresh`/`_verify` call.
    async fn token_pair(&self, request: Request<Body>) -> Result<(String, String), AuthError> {
        let cookies = RequestCookies::from_headers(request.headers());
        let signature = cookies
            .get(&self.config().cookie_names().signature)
            .map(str::to_string)
            .ok_or_else(|| AuthError::Unauthorized("missing signature".to_string()))?;
        let TokenRequest { token } = self.read_json(request).await?;
        if token.is_empty() {
            return Err(AuthError::BadRequest("empty token".to_string()));
        }
        Ok((token, signature))
    }

    fn respond(&self, payload: &AuthPayload, token: String, cookies: Vec<HeaderValue>) -> Response {
        let body = TokenResponse {
            platform: payload.platform.clone(),
            token,
        };
        with_cookies(Json(body).into_response(), cookies)
    }

    async fn sign(&self, request: Request<Body>) -> Result<Response, AuthError> {
        let SignRequest {
            platform,
            credential,
        } = self
            .read_json(request)
            .await
            .map_err(|_| AuthError::BadRequest("invalid sign params".to_string()))?;
        let authorizer = self.authorizer(&platform)?;

        let verification = guarded(
            &platform,
            "verify_credential",
            authorizer.verify_credential(&credential),
        )
        .await?;
        let (data, refreshable) = match verification {
            Verification::Accepted { data, refreshable } => (data, refreshable),
            Verification::Rejected(message) => {
                info!("Credential rejected on {platform}: ({}) {}", message.code, message.reason);
                return Err(message.into());
            }
        };

        let (payload, token, cookies) = self.store.issue_auth(
            &platform,
            data,
            &IssueAuthOptions {
                refreshable,
                refresh_limit: None,
                signature_only: true,
            },
            unix_now(),
        )?;
        info!("Signed in on {platform}");
        Ok(self.respond(&payload, token.content, cookies))
    }

    async fn refresh(&self, request: Request<Body>) -> Result<Response, AuthError> {
        let (content, signature) = self.token_pair(request).await?;
        let now = unix_now();

        // The refresh window outlives the token, so expiration is not checked here.
        let payload = self
            .store
            .verify_auth(&content, &signature, VerifyOptions::ignoring_expiration(), now)
            .map_err(|err| AuthError::from_token(&err))?;
        let authorizer = self.authorizer(&payload.platform)?;

        let limit = payload
            .refresh_limit
            .ok_or_else(|| AuthError::BadRequest("token is not refreshable".to_string()))?;
        if limit <= now {
            return Err(AuthError::Unauthorized("refresh window elapsed".to_string()));
        }

        let verification = guarded(
            &payload.platform,
            "verify_refreshment",
            authorizer.verify_refreshment(&payload.data),
        )
        .await?;
        let (data, refreshable) = match verification {
            Verification::Accepted { data, refreshable } => (data, refreshable),
            Verification::Rejected(message) => {
                info!(
                    "Refreshment rejected on {}: ({}) {}",
                    payload.platform, message.code, message.reason
                );
                return Err(message.into());
            }
        };

        let (refreshed, token, cookies) = self.store.issue_auth(
            &payload.platform,
            data,
            &IssueAuthOptions {
                refreshable,
                refresh_limit: Some(limit),
                signature_only: true,
            },
            now,
        )?;
        debug!("Refreshed token on {}", refreshed.platform);
        Ok(self.respond(&refreshed, token.content, cookies))
    }

    async fn verify(&self, request: Request<Body>) -> Result<Response, AuthError> {
        let (content, signature) = self.token_pair(request).await?;
        let payload = self
            .store
            .verify_auth(&content, &signature, VerifyOptions::default(), unix_now())
            .map_err(|err| AuthError::from_token(&err))?;
        let authorizer = self.authorizer(&payload.platform)?;

        guarded_sync(&payload.platform, "check_auth_data", || {
            authorizer.check_auth_data(&payload.data)
        })?
        .map_err(AuthError::from)?;

        Ok(self.respond(&payload, content, Vec::new()))
    }

    /// Authenticate a request to a protected resource.
    ///
    /// The token content comes from `Authorization: Bearer` unless
    /// `token_override` is given; the signature always comes from its cookie.
    ///
    /// # Errors
    /// Returns the `AuthError` matching the first failed check.
    pub fn verify_auth(
        &self,
        headers: &HeaderMap,
        token_override: Option<&str>,
    ) -> Result<AuthContext, AuthError> {
        let content = match token_override {
            Some(token) if token.is_empty() => {
                return Err(AuthError::BadRequest("empty token".to_string()));
            }
            Some(token) => token.to_string(),
            None => bearer_token(headers)?,
        };
        let cookies = RequestCookies::from_headers(headers);
        let signature = cookies
            .get(&self.config().cookie_names().signature)
            .ok_or_else(|| AuthError::Unauthorized("missing signature".to_string()))?;

        let payload = self
            .store
            .verify_auth(&content, signature, VerifyOptions::default(), unix_now())
            .map_err(|err| AuthError::from_token(&err))?;
        let authorizer = self.authorizer(&payload.platform)?;

        let refined = guarded_sync(&payload.platform, "refine_auth", || {
            authorizer.refine_auth(&payload.data)
        })?
        .ok_or_else(|| AuthError::BadRequest("invalid auth info".to_string()))?;

        Ok(AuthContext {
            platform: payload.platform,
            user: refined.user,
            channel: refined.channel,
            login_at: payload.iat,
            expire_at: payload.exp,
        })
    }
}
