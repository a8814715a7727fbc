//! Server-side configuration: signing secret, token lifetimes and cookie policy.

use crate::types::{CookieNames, CookieScope};
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, str::FromStr};
use thiserror::Error;
use url::Url;

const DEFAULT_ENTRY_PATH: &str = "/auth";
const DEFAULT_TOKEN_AGE_SECONDS: i64 = 60 * 60;
const DEFAULT_AUTH_COOKIE_AGE_SECONDS: i64 = 180 * 24 * 60 * 60;
const DEFAULT_DATA_COOKIE_AGE_SECONDS: i64 = 5 * 60;
const DEFAULT_REFRESH_PERIOD_SECONDS: i64 = 60 * 24 * 60 * 60;
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("secret must not be empty")]
    EmptySecret,
    #[error("invalid entry path: {0}")]
    InvalidEntryPath(String),
    #[error("{0} must be positive")]
    InvalidAge(&'static str),
    #[error("invalid same-site policy: {0}")]
    InvalidSameSite(String),
    #[error("duplicate authorizer for platform \"{0}\"")]
    DuplicatePlatform(String),
    #[error("invalid redirect url: {0}")]
    InvalidRedirectUrl(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SameSite {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lax" => Ok(Self::Lax),
            "none" => Ok(Self::None),
            _ => Err(ConfigError::InvalidSameSite(value.to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    secret: SecretString,
    entry_path: String,
    token_age: i64,
    auth_cookie_age: i64,
    data_cookie_age: i64,
    refresh_period: i64,
    cookie_domain: Option<String>,
    cookie_path: String,
    same_site: SameSite,
    secure: bool,
    dev_mode: bool,
    redirect_url: Option<Url>,
    cookie_names: CookieNames,
    max_body_bytes: usize,
}

impl ServerConfig {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            entry_path: DEFAULT_ENTRY_PATH.to_string(),
            token_age: DEFAULT_TOKEN_AGE_SECONDS,
            auth_cookie_age: DEFAULT_AUTH_COOKIE_AGE_SECONDS,
            data_cookie_age: DEFAULT_DATA_COOKIE_AGE_SECONDS,
            refresh_period: DEFAULT_REFRESH_PERIOD_SECONDS,
            cookie_domain: None,
            cookie_path: "/".to_string(),
            same_site: SameSite::default(),
            secure: true,
            dev_mode: false,
            redirect_url: None,
            cookie_names: CookieNames::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Entry path under which the protocol is served; a trailing slash is dropped.
    #[must_use]
    pub fn with_entry_path(mut self, path: &str) -> Self {
        let trimmed = path.trim().trim_end_matches('/');
        self.entry_path = trimmed.to_string();
        self
    }

    #[must_use]
    pub fn with_token_age(mut self, seconds: i64) -> Self {
        self.token_age = seconds;
        self
    }

    #[must_use]
    pub fn with_auth_cookie_age(mut self, seconds: i64) -> Self {
        self.auth_cookie_age = seconds;
        self
    }

    #[must_use]
    pub fn with_data_cookie_age(mut self, seconds: i64) -> Self {
        self.data_cookie_age = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_period(mut self, seconds: i64) -> Self {
        self.refresh_period = seconds;
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain
            .map(|domain| domain.trim().trim_start_matches('.').to_lowercase())
            .filter(|domain| !domain.is_empty());
        self
    }

    #[must_use]
    pub fn with_cookie_path(mut self, path: &str) -> Self {
        let trimmed = path.trim();
        self.cookie_path = if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        };
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    #[must_use]
    pub fn with_redirect_url(mut self, redirect_url: Option<Url>) -> Self {
        self.redirect_url = redirect_url;
        self
    }

    #[must_use]
    pub fn with_cookie_names(mut self, cookie_names: CookieNames) -> Self {
        self.cookie_names = cookie_names;
        self
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub(crate) fn secret(&self) -> &SecretString {
        &self.secret
    }

    #[must_use]
    pub fn entry_path(&self) -> &str {
        &self.entry_path
    }

    #[must_use]
    pub fn token_age(&self) -> i64 {
        self.token_age
    }

    #[must_use]
    pub fn auth_cookie_age(&self) -> i64 {
        self.auth_cookie_age
    }

    #[must_use]
    pub fn data_cookie_age(&self) -> i64 {
        self.data_cookie_age
    }

    #[must_use]
    pub fn refresh_period(&self) -> i64 {
        self.refresh_period
    }

    #[must_use]
    pub fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    #[must_use]
    pub fn cookie_path(&self) -> &str {
        &self.cookie_path
    }

    #[must_use]
    pub fn same_site(&self) -> SameSite {
        self.same_site
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }

    #[must_use]
    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    #[must_use]
    pub fn redirect_url(&self) -> Option<&Url> {
        self.redirect_url.as_ref()
    }

    #[must_use]
    pub fn cookie_names(&self) -> &CookieNames {
        &self.cookie_names
    }

    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Scope of the auth and error cookies.
    #[must_use]
    pub fn cookie_scope(&self) -> CookieScope {
        CookieScope {
            domain: self.cookie_domain.clone(),
            path: self.cookie_path.clone(),
        }
    }

    /// Check the invariants the controller relies on.
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.expose_secret().is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if !self.entry_path.starts_with('/') || self.entry_path.len() < 2 {
            return Err(ConfigError::InvalidEntryPath(self.entry_path.clone()));
        }
        if self.entry_path.split('/').skip(1).any(str::is_empty) {
            return Err(ConfigError::InvalidEntryPath(self.entry_path.clone()));
        }
        for (name, value) in [
            ("token age", self.token_age),
            ("auth cookie age", self.auth_cookie_age),
            ("data cookie age", self.data_cookie_age),
            ("refresh period", self.refresh_period),
        ] {
            if value <= 0 {
                return Err(ConfigError::InvalidAge(name));
            }
        }
        if let Some(url) = self.redirect_url.as_ref().filter(|url| url.cannot_be_a_base()) {
            return Err(ConfigError::InvalidRedirectUrl(url.to_string()));
        }
        Ok(())
    }
}
