//! HTTP side of the protocol: cookie store, platform contract, controller and router.

pub mod authorizer;
pub mod config;
pub mod controller;
pub mod cookies;
pub mod dev;
pub mod handlers;

pub use authorizer::{AuthFuture, ServerAuthorizer, Verification};
pub use config::{ConfigError, SameSite, ServerConfig};
pub use controller::ServerAuthController;
pub use cookies::{CookieAccessor, CookieSessionStore, RequestCookies};
pub use dev::{DEV_PLATFORM, DevAuthorizer};

use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::get,
};
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;

/// Router serving `/health` and sending every other request to the controller.
#[must_use]
pub fn router(controller: Arc<ServerAuthController>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health).options(handlers::health::health))
        .fallback(handlers::auth::auth)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(controller)),
        )
}

/// Serve the router on `listener` until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    controller: Arc<ServerAuthController>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let address = listener.local_addr()?;
    info!(
        "Listening on {address}, auth entry {}",
        controller.config().entry_path()
    );

    axum::serve(listener, router(controller).into_make_service())
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
