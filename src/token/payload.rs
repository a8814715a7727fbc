use crate::types::{CookieScope, ErrorMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payloads that are bound to the platform that issued them.
pub trait PlatformBound {
    fn platform(&self) -> &str;
}

/// Claims of a session token.
///
/// A missing `refresh_limit` means the token can only be resigned, never refreshed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub platform: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_limit: Option<i64>,
    pub scope: CookieScope,
    pub iat: i64,
    pub exp: i64,
}

impl AuthPayload {
    /// True while `now` is before the refresh limit.
    #[must_use]
    pub fn refreshable_at(&self, now: i64) -> bool {
        self.refresh_limit.is_some_and(|limit| limit > now)
    }
}

/// Claims of the short-lived token used across a login redirect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatePayload {
    pub platform: String,
    pub state: Value,
    pub iat: i64,
    pub exp: i64,
}

/// Claims of a login failure carried across a redirect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub platform: String,
    pub error: ErrorMessage,
    pub scope: CookieScope,
    pub iat: i64,
}

impl PlatformBound for AuthPayload {
    fn platform(&self) -> &str {
        &self.platform
    }
}

impl PlatformBound for StatePayload {
    fn platform(&self) -> &str {
        &self.platform
    }
}

impl PlatformBound for ErrorPayload {
    fn platform(&self) -> &str {
        &self.platform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(refresh_limit: Option<i64>) -> AuthPayload {
        AuthPayload {
            platform: "foo".to_string(),
            data: json!({ "user": "jojo" }),
            refresh_limit,
            scope: CookieScope::default(),
            iat: 100,
            exp: 200,
        }
    }

    #[test]
    fn refresh_limit_is_omitted_when_absent() -> anyhow::Result<()> {
        let value = serde_json::to_value(payload(None))?;
        assert!(value.get("refreshLimit").is_none());

        let value = serde_json::to_value(payload(Some(300)))?;
        assert_eq!(value["refreshLimit"], json!(300));
        Ok(())
    }

    #[test]
    fn refreshable_at_respects_limit() {
        assert!(!payload(None).refreshable_at(150));
        assert!(payload(Some(300)).refreshable_at(299));
        assert!(!payload(Some(300)).refreshable_at(300));
    }
}
