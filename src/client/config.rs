use super::{authorizer::ClientAuthorizer, error::ClientError};
use crate::types::CookieNames;
use std::{fmt, sync::Arc, time::Duration};
use url::Url;

const DEFAULT_REFRESH_LEAD_TIME: Duration = Duration::from_secs(5 * 60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ClientConfig {
    server_url: Url,
    authorizers: Vec<Arc<dyn ClientAuthorizer>>,
    refresh_lead_time: Duration,
    location: Option<Url>,
    cookie_names: CookieNames,
    request_timeout: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_url", &self.server_url.as_str())
            .field(
                "authorizers",
                &self
                    .authorizers
                    .iter()
                    .map(|authorizer| authorizer.platform())
                    .collect::<Vec<_>>(),
            )
            .field("refresh_lead_time", &self.refresh_lead_time)
            .field("location", &self.location.as_ref().map(Url::as_str))
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// `server_url` is the auth entry, e.g. `https://example.com/auth`.
    #[must_use]
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            authorizers: Vec::new(),
            refresh_lead_time: DEFAULT_REFRESH_LEAD_TIME,
            location: None,
            cookie_names: CookieNames::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Parse the entry URL and build a config from it.
    ///
    /// # Errors
    /// Returns `ClientError::Config` if the URL is invalid.
    pub fn parse(server_url: &str) -> Result<Self, ClientError> {
        let url = Url::parse(server_url)
            .map_err(|err| ClientError::Config(format!("invalid server url {server_url}: {err}")))?;
        Ok(Self::new(url))
    }

    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn ClientAuthorizer>) -> Self {
        self.authorizers.push(authorizer);
        self
    }

    #[must_use]
    pub fn with_refresh_lead_time(mut self, lead_time: Duration) -> Self {
        self.refresh_lead_time = lead_time;
        self
    }

    /// Page the client runs on; its `platform` query parameter drives bootstrap.
    #[must_use]
    pub fn with_location(mut self, location: Option<Url>) -> Self {
        self.location = location;
        self
    }

    #[must_use]
    pub fn with_cookie_names(mut self, cookie_names: CookieNames) -> Self {
        self.cookie_names = cookie_names;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    #[must_use]
    pub fn authorizers(&self) -> &[Arc<dyn ClientAuthorizer>] {
        &self.authorizers
    }

    #[must_use]
    pub fn refresh_lead_time(&self) -> Duration {
        self.refresh_lead_time
    }

    #[must_use]
    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    #[must_use]
    pub fn cookie_names(&self) -> &CookieNames {
        &self.cookie_names
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// `platform` query parameter of the current location.
    #[must_use]
    pub fn location_platform(&self) -> Option<String> {
        self.location.as_ref().and_then(|location| {
            location
                .query_pairs()
                .find(|(key, _)| key == "platform")
                .map(|(_, value)| value.into_owned())
                .filter(|value| !value.is_empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_defaults_and_overrides() -> anyhow::Result<()> {
        let config = ClientConfig::parse("https://example.com/auth")?;
        assert_eq!(config.server_url().as_str(), "https://example.com/auth");
        assert_eq!(config.refresh_lead_time(), Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(config.authorizers().is_empty());
        assert_eq!(config.location_platform(), None);

        let config = config
            .with_refresh_lead_time(Duration::from_secs(30))
            .with_location(Some(Url::parse("https://example.com/app?platform=foo&x=1")?));
        assert_eq!(config.refresh_lead_time(), Duration::from_secs(30));
        assert_eq!(config.location_platform().as_deref(), Some("foo"));
        Ok(())
    }

    #[test]
    fn parse_rejects_invalid_url() {
        assert!(matches!(
            ClientConfig::parse("not a url"),
            Err(ClientError::Config(_))
        ));
    }
}
