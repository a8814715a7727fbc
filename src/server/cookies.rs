//! Cookie-backed storage of auth, state and error tokens.

use super::config::ServerConfig;
use crate::{
    error::AuthError,
    token::{
        self, AuthPayload, ErrorPayload, IssueAuthOptions, PlatformBound, SplitToken,
        StatePayload, TokenCodec, VerifyOptions,
    },
    types::ErrorMessage,
    unix_now,
};
use axum::{
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{COOKIE, HOST, LOCATION},
    },
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;
use url::Url;

/// Cookies sent with a request, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct RequestCookies(HashMap<String, String>);

impl RequestCookies {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cookies = HashMap::new();
        for header in headers.get_all(COOKIE) {
            let Ok(value) = header.to_str() else {
                continue;
            };
            for pair in value.split(';') {
                let mut parts = pair.trim().splitn(2, '=');
                let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let key = key.trim();
                let val = val.trim();
                // First occurrence wins, browsers send the most specific path first.
                if !key.is_empty() && !val.is_empty() {
                    cookies
                        .entry(key.to_string())
                        .or_insert_with(|| val.to_string());
                }
            }
        }
        Self(cookies)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

struct CookieAttrs<'a> {
    domain: Option<&'a str>,
    path: &'a str,
    max_age: i64,
    http_only: bool,
}

/// Signs auth, state and error payloads into cookies and reads them back.
#[derive(Debug)]
pub struct CookieSessionStore {
    config: Arc<ServerConfig>,
    codec: TokenCodec,
}

impl CookieSessionStore {
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let codec = TokenCodec::new(
            config.secret().clone(),
            config.token_age(),
            config.refresh_period(),
        );
        Self { config, codec }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    fn state_path(&self, platform: &str) -> String {
        format!("{}/{platform}", self.config.entry_path())
    }

    fn cookie(&self, name: &str, value: &str, attrs: &CookieAttrs<'_>) -> Result<HeaderValue, AuthError> {
        let mut cookie = format!(
            "{name}={value}; Path={}; Max-Age={}; SameSite={}",
            attrs.path,
            attrs.max_age,
            self.config.same_site()
        );
        if let Some(domain) = attrs.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if attrs.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.config.secure() {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
            .map_err(|err| AuthError::Internal(format!("invalid cookie {name}: {err}")))
    }

    fn clear(&self, name: &str, domain: Option<&str>, path: &str, http_only: bool) -> Result<HeaderValue, AuthError> {
        self.cookie(
            name,
            "",
            &CookieAttrs {
                domain,
                path,
                max_age: 0,
                http_only,
            },
        )
    }

    fn read<T: DeserializeOwned + PlatformBound>(
        &self,
        content: &str,
        signature: &str,
        platform: &str,
        now: i64,
    ) -> Option<T> {
        match self
            .codec
            .verify::<T>(content, signature, VerifyOptions::default(), now)
        {
            Ok(payload) if payload.platform() == platform => Some(payload),
            Ok(payload) => {
                debug!(
                    "Cookie issued for platform {} ignored on {platform}",
                    payload.platform()
                );
                None
            }
            Err(err) => {
                debug!("Cookie rejected: {err}");
                None
            }
        }
    }

    /// Verify an auth token from its two halves, without a platform check.
    ///
    /// # Errors
    /// Returns the codec failure.
    pub fn verify_auth(
        &self,
        content: &str,
        signature: &str,
        options: VerifyOptions,
        now: i64,
    ) -> Result<AuthPayload, token::Error> {
        self.codec.verify(content, signature, options, now)
    }

    /// Auth payload of the request, if both halves are present, valid and bound to `platform`.
    #[must_use]
    pub fn get_auth(&self, cookies: &RequestCookies, platform: &str, now: i64) -> Option<AuthPayload> {
        let names = self.config.cookie_names();
        let content = cookies.get(&names.token)?;
        let signature = cookies.get(&names.signature)?;
        self.read(content, signature, platform, now)
    }

    #[must_use]
    pub fn get_state(&self, cookies: &RequestCookies, platform: &str, now: i64) -> Option<StatePayload> {
        let (content, signature) = cookies
            .get(&self.config.cookie_names().state)?
            .rsplit_once('.')?;
        self.read(content, signature, platform, now)
    }

    #[must_use]
    pub fn get_error(&self, cookies: &RequestCookies, platform: &str, now: i64) -> Option<ErrorPayload> {
        let (content, signature) = cookies
            .get(&self.config.cookie_names().error)?
            .rsplit_once('.')?;
        self.read(content, signature, platform, now)
    }

    /// Issue a new auth token.
    ///
    /// Returns the token and the `Set-Cookie` values: the `HttpOnly`
    /// signature cookie, the content cookie (cleared instead when
    /// `signature_only`), and removal of the state and error cookies.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` if the token or a cookie cannot be built.
    pub fn issue_auth(
        &self,
        platform: &str,
        data: Value,
        options: &IssueAuthOptions,
        now: i64,
    ) -> Result<(AuthPayload, SplitToken, Vec<HeaderValue>), AuthError> {
        let scope = self.config.cookie_scope();
        let payload = self
            .codec
            .auth_payload(platform, data, options, scope.clone(), now);
        let token = self
            .codec
            .sign(&payload)
            .map_err(|err| AuthError::Internal(format!("failed to sign token: {err}")))?;

        let names = self.config.cookie_names();
        let attrs = |http_only| CookieAttrs {
            domain: scope.domain.as_deref(),
            path: &scope.path,
            max_age: self.config.auth_cookie_age(),
            http_only,
        };
        let mut cookies = vec![self.cookie(&names.signature, &token.signature, &attrs(true))?];
        if options.signature_only {
            cookies.push(self.clear(&names.token, scope.domain.as_deref(), &scope.path, false)?);
        } else {
            cookies.push(self.cookie(&names.token, &token.content, &attrs(false))?);
        }
        cookies.push(self.clear(&names.state, None, &self.state_path(platform), true)?);
        cookies.push(self.clear(&names.error, scope.domain.as_deref(), &scope.path, false)?);

        Ok((payload, token, cookies))
    }

    /// Issue a short-lived state cookie scoped to the platform's login path.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` if the token or cookie cannot be built.
    pub fn issue_state(&self, platform: &str, state: Value, now: i64) -> Result<Vec<HeaderValue>, AuthError> {
        let payload = StatePayload {
            platform: platform.to_string(),
            state,
            iat: now,
            exp: now + self.config.data_cookie_age(),
        };
        let token = self
            .codec
            .sign(&payload)
            .map_err(|err| AuthError::Internal(format!("failed to sign state: {err}")))?;
        let path = self.state_path(platform);
        let cookie = self.cookie(
            &self.config.cookie_names().state,
            &format!("{}.{}", token.content, token.signature),
            &CookieAttrs {
                domain: None,
                path: &path,
                max_age: self.config.data_cookie_age(),
                http_only: true,
            },
        )?;
        Ok(vec![cookie])
    }

    /// Issue an error cookie readable by the client, and drop any session.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` if the token or a cookie cannot be built.
    pub fn issue_error(&self, platform: &str, error: ErrorMessage, now: i64) -> Result<Vec<HeaderValue>, AuthError> {
        let scope = self.config.cookie_scope();
        let payload = ErrorPayload {
            platform: platform.to_string(),
            error,
            scope: scope.clone(),
            iat: now,
        };
        let token = self
            .codec
            .sign(&payload)
            .map_err(|err| AuthError::Internal(format!("failed to sign error: {err}")))?;

        let names = self.config.cookie_names();
        let domain = scope.domain.as_deref();
        Ok(vec![
            self.cookie(
                &names.error,
                &format!("{}.{}", token.content, token.signature),
                &CookieAttrs {
                    domain,
                    path: &scope.path,
                    max_age: self.config.data_cookie_age(),
                    http_only: false,
                },
            )?,
            self.clear(&names.state, None, &self.state_path(platform), true)?,
            self.clear(&names.signature, domain, &scope.path, true)?,
            self.clear(&names.token, domain, &scope.path, false)?,
        ])
    }

    /// Whether `url` is a safe redirect target.
    ///
    /// The scheme must be `https` (`http` is allowed in dev mode), the host must
    /// equal or be a subdomain of the cookie domain (or `fallback_host` when no
    /// domain is configured), and the path must sit under the cookie path.
    #[must_use]
    pub fn check_url_scope(&self, url: &Url, fallback_host: Option<&str>) -> bool {
        let scheme_ok = match url.scheme() {
            "https" => true,
            "http" => self.config.dev_mode(),
            _ => false,
        };
        if !scheme_ok {
            return false;
        }

        let Some(host) = url.host_str().map(str::to_lowercase) else {
            return false;
        };
        let Some(domain) = self
            .config
            .cookie_domain()
            .map(str::to_string)
            .or_else(|| fallback_host.map(str::to_lowercase))
        else {
            return false;
        };
        if host != domain && !host.ends_with(&format!(".{domain}")) {
            return false;
        }

        path_in_scope(url.path(), self.config.cookie_path())
    }
}

fn path_in_scope(path: &str, scope: &str) -> bool {
    let scope = scope.trim_end_matches('/');
    if scope.is_empty() {
        return true;
    }
    path == scope
        || path
            .strip_prefix(scope)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Per-request view of the session store bound to one platform.
///
/// Cookies issued through the accessor are collected and attached to the
/// response the delegated authorizer returns.
#[derive(Debug)]
pub struct CookieAccessor {
    store: Arc<CookieSessionStore>,
    platform: String,
    cookies: RequestCookies,
    host: Option<String>,
    issued: Vec<HeaderValue>,
}

impl CookieAccessor {
    #[must_use]
    pub fn new(store: Arc<CookieSessionStore>, platform: &str, headers: &HeaderMap) -> Self {
        let host = headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(':').next())
            .map(str::to_string);
        Self {
            store,
            platform: platform.to_string(),
            cookies: RequestCookies::from_headers(headers),
            host,
            issued: Vec::new(),
        }
    }

    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    #[must_use]
    pub fn get_state(&self) -> Option<Value> {
        self.store
            .get_state(&self.cookies, &self.platform, unix_now())
            .map(|payload| payload.state)
    }

    /// # Errors
    /// Returns `AuthError::Internal` if the cookie cannot be built.
    pub fn issue_state(&mut self, state: Value) -> Result<(), AuthError> {
        let cookies = self.store.issue_state(&self.platform, state, unix_now())?;
        self.issued.extend(cookies);
        Ok(())
    }

    #[must_use]
    pub fn get_auth(&self) -> Option<AuthPayload> {
        self.store.get_auth(&self.cookies, &self.platform, unix_now())
    }

    /// # Errors
    /// Returns `AuthError::Internal` if the token or cookies cannot be built.
    pub fn issue_auth(&mut self, data: Value, options: IssueAuthOptions) -> Result<SplitToken, AuthError> {
        let (_, token, cookies) = self
            .store
            .issue_auth(&self.platform, data, &options, unix_now())?;
        self.issued.extend(cookies);
        Ok(token)
    }

    #[must_use]
    pub fn get_error(&self) -> Option<ErrorMessage> {
        self.store
            .get_error(&self.cookies, &self.platform, unix_now())
            .map(|payload| payload.error)
    }

    /// # Errors
    /// Returns `AuthError::Internal` if the cookies cannot be built.
    pub fn issue_error(&mut self, error: ErrorMessage) -> Result<(), AuthError> {
        let cookies = self.store.issue_error(&self.platform, error, unix_now())?;
        self.issued.extend(cookies);
        Ok(())
    }

    /// Build a `302` towards `target`, resolved against the configured
    /// redirect URL. Without a target the redirect URL itself is used.
    ///
    /// # Errors
    /// Returns `AuthError::BadRequest` if the target cannot be resolved, or is
    /// off-scope while `assert_internal` is set.
    pub fn redirect(&self, target: Option<&str>, assert_internal: bool) -> Result<Response, AuthError> {
        let base = self.store.config().redirect_url();
        let url = match (base, target) {
            (Some(base), Some(target)) => base.join(target),
            (None, Some(target)) => Url::parse(target),
            (Some(base), None) => Ok(base.clone()),
            (None, None) => {
                return Err(AuthError::BadRequest("no redirect target".to_string()));
            }
        }
        .map_err(|err| AuthError::BadRequest(format!("invalid redirect target: {err}")))?;

        if assert_internal && !self.store.check_url_scope(&url, self.host.as_deref()) {
            debug!("Redirect target out of scope: {url}");
            return Err(AuthError::BadRequest("redirect target out of scope".to_string()));
        }

        let location = HeaderValue::from_str(url.as_str())
            .map_err(|err| AuthError::BadRequest(format!("invalid redirect target: {err}")))?;
        Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
    }

    /// Cookies issued so far, in order.
    #[must_use]
    pub fn issued_cookies(&self) -> &[HeaderValue] {
        &self.issued
    }

    pub(crate) fn take_cookies(&mut self) -> Vec<HeaderValue> {
        std::mem::take(&mut self.issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{server::config::SameSite, types::CookieScope};
    use secrecy::SecretString;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn store_with(config: ServerConfig) -> Arc<CookieSessionStore> {
        Arc::new(CookieSessionStore::new(Arc::new(config)))
    }

    fn store() -> Arc<CookieSessionStore> {
        store_with(ServerConfig::new(SecretString::from("secret".to_string())))
    }

    fn strings(cookies: &[HeaderValue]) -> Vec<String> {
        cookies
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    fn find<'a>(cookies: &'a [String], name: &str) -> Option<&'a String> {
        cookies.iter().find(|cookie| cookie.starts_with(&format!("{name}=")))
    }

    fn cookie_header(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(COOKIE, value);
        }
        headers
    }

    fn value_of(cookie: &str) -> String {
        cookie
            .split(';')
            .next()
            .and_then(|pair| pair.split_once('='))
            .map(|(_, value)| value.to_string())
            .unwrap_or_default()
    }

    #[test]
    fn request_cookies_parse() {
        let headers = cookie_header(&[("a", "1"), ("b", "x=y"), ("empty", "")]);
        let cookies = RequestCookies::from_headers(&headers);
        assert_eq!(cookies.get("a"), Some("1"));
        assert_eq!(cookies.get("b"), Some("x=y"));
        assert_eq!(cookies.get("empty"), None);
        assert_eq!(cookies.get("missing"), None);
    }

    #[test]
    fn issue_auth_sets_pair_and_clears_companions() -> anyhow::Result<()> {
        let store = store();
        let (payload, token, cookies) = store.issue_auth(
            "foo",
            json!({ "user": "jojo" }),
            &IssueAuthOptions::default(),
            NOW,
        )?;
        let cookies = strings(&cookies);
        assert_eq!(cookies.len(), 4);

        let signature = find(&cookies, "crossauth_signature").map(String::as_str).unwrap_or_default();
        assert!(signature.contains("HttpOnly"));
        assert!(signature.contains("Secure"));
        assert!(signature.contains("SameSite=Lax"));
        assert_eq!(value_of(signature), token.signature);

        let content = find(&cookies, "crossauth_token").map(String::as_str).unwrap_or_default();
        assert!(!content.contains("HttpOnly"));
        assert_eq!(value_of(content), token.content);

        let state = find(&cookies, "crossauth_state").map(String::as_str).unwrap_or_default();
        assert!(state.contains("Max-Age=0"));
        assert!(state.contains("Path=/auth/foo"));
        let error = find(&cookies, "crossauth_error").map(String::as_str).unwrap_or_default();
        assert!(error.contains("Max-Age=0"));

        assert_eq!(payload.scope, CookieScope::default());
        assert_eq!(payload.exp, NOW + 3600);
        Ok(())
    }

    #[test]
    fn signature_only_withholds_content() -> anyhow::Result<()> {
        let store = store();
        let (_, _, cookies) = store.issue_auth(
            "foo",
            json!(null),
            &IssueAuthOptions {
                signature_only: true,
                ..IssueAuthOptions::default()
            },
            NOW,
        )?;
        let cookies = strings(&cookies);
        let content = find(&cookies, "crossauth_token").map(String::as_str).unwrap_or_default();
        assert_eq!(value_of(content), "");
        assert!(content.contains("Max-Age=0"));
        Ok(())
    }

    #[test]
    fn issue_error_clears_session() -> anyhow::Result<()> {
        let store = store();
        let cookies = strings(&store.issue_error("foo", ErrorMessage::new(401, "denied"), NOW)?);
        assert_eq!(cookies.len(), 4);
        for name in ["crossauth_state", "crossauth_signature", "crossauth_token"] {
            let cookie = find(&cookies, name).map(String::as_str).unwrap_or_default();
            assert!(cookie.contains("Max-Age=0"), "{name} should be cleared");
        }
        let error = find(&cookies, "crossauth_error").map(String::as_str).unwrap_or_default();
        assert!(!error.contains("HttpOnly"));
        assert!(error.contains("Max-Age=300"));
        Ok(())
    }

    #[test]
    fn get_auth_requires_both_halves_and_platform() -> anyhow::Result<()> {
        let store = store();
        let (payload, token, _) =
            store.issue_auth("foo", json!({ "a": 1 }), &IssueAuthOptions::default(), NOW)?;

        let both = RequestCookies::from_headers(&cookie_header(&[
            ("crossauth_token", &token.content),
            ("crossauth_signature", &token.signature),
        ]));
        assert_eq!(store.get_auth(&both, "foo", NOW + 1), Some(payload));
        assert_eq!(store.get_auth(&both, "bar", NOW + 1), None);
        assert_eq!(store.get_auth(&both, "foo", NOW + 3600), None);

        let content_only =
            RequestCookies::from_headers(&cookie_header(&[("crossauth_token", &token.content)]));
        assert_eq!(store.get_auth(&content_only, "foo", NOW + 1), None);
        Ok(())
    }

    #[test]
    fn state_and_error_round_trip_through_cookies() -> anyhow::Result<()> {
        let store = store();
        let state = strings(&store.issue_state("foo", json!("nonce"), NOW)?);
        let state_cookie = find(&state, "crossauth_state").map(String::as_str).unwrap_or_default();
        assert!(state_cookie.contains("HttpOnly"));
        assert!(state_cookie.contains("Path=/auth/foo"));

        let error = strings(&store.issue_error("foo", ErrorMessage::new(403, "no"), NOW)?);
        let error_cookie = find(&error, "crossauth_error").map(String::as_str).unwrap_or_default();

        let cookies = RequestCookies::from_headers(&cookie_header(&[
            ("crossauth_state", &value_of(state_cookie)),
            ("crossauth_error", &value_of(error_cookie)),
        ]));
        let read_state = store.get_state(&cookies, "foo", NOW + 1);
        assert_eq!(read_state.map(|payload| payload.state), Some(json!("nonce")));
        assert!(store.get_state(&cookies, "bar", NOW + 1).is_none());
        assert!(store.get_state(&cookies, "foo", NOW + 300).is_none());

        let read_error = store.get_error(&cookies, "foo", NOW + 1);
        assert_eq!(read_error.map(|payload| payload.error), Some(ErrorMessage::new(403, "no")));
        assert!(store.get_error(&cookies, "bar", NOW + 1).is_none());
        Ok(())
    }

    #[test]
    fn cookie_attributes_follow_config() -> anyhow::Result<()> {
        let store = store_with(
            ServerConfig::new(SecretString::from("secret".to_string()))
                .with_cookie_domain(Some("example.com".to_string()))
                .with_cookie_path("/app")
                .with_same_site(SameSite::Strict)
                .with_secure(false),
        );
        let (payload, _, cookies) =
            store.issue_auth("foo", json!(null), &IssueAuthOptions::default(), NOW)?;
        let cookies = strings(&cookies);
        let signature = find(&cookies, "crossauth_signature").map(String::as_str).unwrap_or_default();
        assert!(signature.contains("Domain=example.com"));
        assert!(signature.contains("Path=/app"));
        assert!(signature.contains("SameSite=Strict"));
        assert!(!signature.contains("Secure"));
        assert_eq!(payload.scope.domain.as_deref(), Some("example.com"));
        Ok(())
    }

    #[test]
    fn url_scope_checks() -> anyhow::Result<()> {
        let store = store_with(
            ServerConfig::new(SecretString::from("secret".to_string()))
                .with_cookie_domain(Some("example.com".to_string()))
                .with_cookie_path("/app"),
        );
        let ok = |url: &str| -> anyhow::Result<bool> {
            Ok(store.check_url_scope(&Url::parse(url)?, None))
        };
        assert!(ok("https://example.com/app")?);
        assert!(ok("https://www.example.com/app/page?x=1")?);
        assert!(!ok("http://example.com/app")?);
        assert!(!ok("https://evilexample.com/app")?);
        assert!(!ok("https://example.com.evil.org/app")?);
        assert!(!ok("https://example.com/application")?);
        assert!(!ok("https://example.com/")?);
        assert!(!ok("javascript:alert(1)")?);

        let dev = store_with(
            ServerConfig::new(SecretString::from("secret".to_string())).with_dev_mode(true),
        );
        let url = Url::parse("http://localhost:8080/anything")?;
        assert!(dev.check_url_scope(&url, Some("localhost")));
        assert!(!dev.check_url_scope(&url, Some("example.com")));
        assert!(!dev.check_url_scope(&url, None));
        Ok(())
    }

    #[test]
    fn accessor_collects_cookies_and_redirects() -> anyhow::Result<()> {
        let store = store_with(
            ServerConfig::new(SecretString::from("secret".to_string()))
                .with_redirect_url(Some(Url::parse("https://app.example.com/home")?)),
        );
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("app.example.com:443"));
        let mut accessor = CookieAccessor::new(store, "foo", &headers);
        assert_eq!(accessor.platform(), "foo");
        assert!(accessor.get_auth().is_none());

        accessor.issue_state(json!({ "nonce": 1 }))?;
        accessor.issue_auth(json!({ "user": "jojo" }), IssueAuthOptions::default())?;
        assert_eq!(accessor.issued_cookies().len(), 5);

        let response = accessor.redirect(Some("/welcome"), true)?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("https://app.example.com/welcome")
        );

        assert!(matches!(
            accessor.redirect(Some("https://evil.org/"), true),
            Err(AuthError::BadRequest(_))
        ));
        assert!(accessor.redirect(Some("https://evil.org/"), false).is_ok());

        assert_eq!(accessor.take_cookies().len(), 5);
        assert!(accessor.issued_cookies().is_empty());
        Ok(())
    }
}
