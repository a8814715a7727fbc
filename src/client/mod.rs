//! Webview side of the protocol: bootstrap a platform, sign in, keep the
//! session refreshed and drop it on expiry or sign-out.

mod api;
mod authorizer;
mod config;
mod controller;
mod error;
mod state;
mod timer;

pub use api::{AuthApi, AuthTransport};
pub use authorizer::{ClientAuthorizer, ClientFuture};
pub use config::ClientConfig;
pub use controller::AuthClient;
pub use error::ClientError;
pub use state::{AuthEvent, AuthResponse};
