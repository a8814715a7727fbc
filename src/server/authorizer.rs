//! Contract a platform plugs into the server controller.

use super::cookies::CookieAccessor;
use crate::types::{ErrorMessage, RefinedAuth};
use axum::{body::Body, http::Request, response::Response};
use serde_json::Value;
use std::{future::Future, pin::Pin};

pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Outcome of checking a credential or a refreshment.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Accepted { data: Value, refreshable: bool },
    Rejected(ErrorMessage),
}

impl Verification {
    #[must_use]
    pub fn accept(data: Value, refreshable: bool) -> Self {
        Self::Accepted { data, refreshable }
    }

    #[must_use]
    pub fn reject(code: u16, reason: impl Into<String>) -> Self {
        Self::Rejected(ErrorMessage::new(code, reason))
    }
}

/// Server half of a platform integration.
///
/// Returning `Err` (or panicking) from any method is answered with a 500;
/// the controller never lets a platform failure escape request handling.
pub trait ServerAuthorizer: Send + Sync {
    /// Platform name, also the first path segment under the entry path.
    fn platform(&self) -> &str;

    /// Handle a request under `<entry>/<platform>/...`, typically a login
    /// redirect or its callback. `Ok(None)` means the request was left
    /// unanswered and yields a 501.
    fn delegate_auth_request<'a>(
        &'a self,
        request: Request<Body>,
        cookies: &'a mut CookieAccessor,
    ) -> AuthFuture<'a, Option<Response>>;

    /// Check a credential posted to `_sign`.
    fn verify_credential<'a>(&'a self, credential: &'a Value) -> AuthFuture<'a, Verification>;

    /// Confirm that the data of a refreshable token may be re-issued.
    fn verify_refreshment<'a>(&'a self, data: &'a Value) -> AuthFuture<'a, Verification>;

    /// Extract user and channel from auth data; `None` when the data is unusable.
    fn refine_auth(&self, data: &Value) -> Option<RefinedAuth>;

    /// Validate auth data still holds, returning context details.
    ///
    /// # Errors
    /// Returns the rejection to echo to the caller.
    fn check_auth_data(&self, data: &Value) -> Result<Value, ErrorMessage> {
        Ok(data.clone())
    }
}
