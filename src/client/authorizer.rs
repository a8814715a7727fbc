//! Contract a platform plugs into the auth client.

use crate::types::{ErrorMessage, RefinedAuth};
use serde_json::Value;
use std::{future::Future, pin::Pin};

pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Client half of a platform integration.
pub trait ClientAuthorizer: Send + Sync {
    fn platform(&self) -> &str;

    /// Whether the client may silently re-run the sign flow once a token can
    /// no longer be refreshed.
    fn should_resign(&self) -> bool {
        false
    }

    /// Prepare the platform, once per bootstrap.
    ///
    /// `server_data` is the data of a backend-issued session for this platform
    /// and `server_error` a login failure the backend reported, if any.
    fn init<'a>(
        &'a self,
        auth_entry: &'a str,
        server_data: Option<&'a Value>,
        server_error: Option<&'a ErrorMessage>,
    ) -> ClientFuture<'a, anyhow::Result<()>>;

    /// Produce a credential to post to `_sign`.
    fn fetch_credential<'a>(&'a self, auth_entry: &'a str) -> ClientFuture<'a, Result<Value, ErrorMessage>>;

    /// Extract user and channel from auth data; `None` when the data is unusable.
    fn refine_auth(&self, data: &Value) -> Option<RefinedAuth>;
}
