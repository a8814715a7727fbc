use crate::server::ServerAuthController;
use axum::{body::Body, extract::Extension, http::Request, response::Response};
use std::sync::Arc;

// axum fallback handing every non-health request to the controller
pub async fn auth(
    Extension(controller): Extension<Arc<ServerAuthController>>,
    request: Request<Body>,
) -> Response {
    controller.delegate_auth_request(request).await
}
