//! Wire and context types shared by the server controller and the client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_TOKEN_COOKIE: &str = "crossauth_token";
pub const DEFAULT_SIGNATURE_COOKIE: &str = "crossauth_signature";
pub const DEFAULT_STATE_COOKIE: &str = "crossauth_state";
pub const DEFAULT_ERROR_COOKIE: &str = "crossauth_error";

/// A `{code, reason}` pair, carried in error responses, error cookies and
/// authorizer rejections.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: u16,
    pub reason: String,
}

impl ErrorMessage {
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Domain and path a cookie was issued under.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CookieScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub path: String,
}

impl Default for CookieScope {
    fn default() -> Self {
        Self {
            domain: None,
            path: "/".to_string(),
        }
    }
}

/// Names of the four cookies the protocol uses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieNames {
    pub token: String,
    pub signature: String,
    pub state: String,
    pub error: String,
}

impl Default for CookieNames {
    fn default() -> Self {
        Self {
            token: DEFAULT_TOKEN_COOKIE.to_string(),
            signature: DEFAULT_SIGNATURE_COOKIE.to_string(),
            state: DEFAULT_STATE_COOKIE.to_string(),
            error: DEFAULT_ERROR_COOKIE.to_string(),
        }
    }
}

/// Body of `POST _sign`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignRequest {
    pub platform: String,
    pub credential: Value,
}

/// Body of `POST _refresh` and `POST _verify`; `token` is the content half.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

/// Successful private API response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub platform: String,
    pub token: String,
}

/// Failed private API response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: ErrorMessage,
}

/// A platform-scoped identity, used for both users and channels.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Principal {
    pub platform: String,
    pub uid: String,
}

impl Principal {
    #[must_use]
    pub fn new(platform: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            uid: uid.into(),
        }
    }
}

/// What an authorizer extracts from its auth data.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefinedAuth {
    pub user: Principal,
    pub channel: Principal,
}

/// Authenticated context handed to applications.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub platform: String,
    pub user: Principal,
    pub channel: Principal,
    pub login_at: i64,
    pub expire_at: i64,
}
