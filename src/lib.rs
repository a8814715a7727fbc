//! # Crossauth (cross-platform webview authentication)
//!
//! `crossauth` bridges a browser or webview client and a multi-platform identity
//! backend. A platform (a chat app, a social login, ...) plugs in through a pair of
//! authorizers: a [`server::ServerAuthorizer`] that verifies credentials on the
//! backend and a [`client::ClientAuthorizer`] that obtains them in the webview.
//!
//! ## Split-cookie tokens
//!
//! Sessions are compact HMAC-SHA256 tokens of the form `header.payload.signature`.
//! The `header.payload` half (the *content*) may be handed to client script and
//! is sent as a bearer token. The signature half always lives in an `HttpOnly`
//! cookie. Neither half authenticates on its own, so script injection alone
//! cannot forge or exfiltrate a usable session.
//!
//! ## Refresh vs. resign
//!
//! Each auth token carries an optional `refreshLimit`. Until that instant the
//! client can trade an expiring token for a new one through `_refresh`; past it
//! the client either resigns silently (when the platform can re-derive a
//! credential without user interaction) or lets the session expire.
//!
//! ## Private API
//!
//! Under the configured entry path (`/auth` by default) the server exposes
//! `POST _sign`, `POST _refresh` and `POST _verify`. Every other first segment
//! names a platform and is delegated to that platform's authorizer.

pub mod cli;
pub mod client;
pub mod error;
pub mod server;
pub mod token;
pub mod types;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Seconds since the Unix epoch, as used by token `iat`/`exp` claims.
#[must_use]
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
