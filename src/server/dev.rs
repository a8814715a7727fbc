//! `dev` platform for local use: trusts whatever user name it is given.

use super::{
    authorizer::{AuthFuture, ServerAuthorizer, Verification},
    cookies::CookieAccessor,
};
use crate::{
    token::IssueAuthOptions,
    types::{ErrorMessage, Principal, RefinedAuth},
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::{info, warn};

pub const DEV_PLATFORM: &str = "dev";

fn user_of(value: &Value) -> Option<&str> {
    value
        .get("user")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|user| !user.is_empty())
}

/// Accepts `{"user": "<name>"}` credentials and a `GET <entry>/dev/login?user=<name>`
/// redirect login. Never enable outside local development.
#[derive(Debug, Default, Clone, Copy)]
pub struct DevAuthorizer;

impl ServerAuthorizer for DevAuthorizer {
    fn platform(&self) -> &str {
        DEV_PLATFORM
    }

    fn delegate_auth_request<'a>(
        &'a self,
        request: Request<Body>,
        cookies: &'a mut CookieAccessor,
    ) -> AuthFuture<'a, Option<Response>> {
        Box::pin(async move {
            if !request.uri().path().ends_with("/login") {
                return Ok(Some(StatusCode::NOT_FOUND.into_response()));
            }

            let mut user = None;
            let mut target = None;
            for (key, value) in url::form_urlencoded::parse(request.uri().query().unwrap_or("").as_bytes()) {
                match key.as_ref() {
                    "user" => user = Some(value.trim().to_string()),
                    "redirect" => target = Some(value.into_owned()),
                    _ => {}
                }
            }

            match user.filter(|user| !user.is_empty()) {
                Some(user) => {
                    info!("Dev login for {user}");
                    cookies.issue_auth(
                        json!({ "user": user }),
                        IssueAuthOptions {
                            refreshable: true,
                            ..IssueAuthOptions::default()
                        },
                    )?;
                }
                None => {
                    warn!("Dev login without user");
                    cookies.issue_error(ErrorMessage::new(400, "missing user"))?;
                }
            }

            if target.is_none() && cookies.redirect(None, false).is_err() {
                return Ok(Some(StatusCode::NO_CONTENT.into_response()));
            }
            let response = match cookies.redirect(target.as_deref(), true) {
                Ok(response) => response,
                Err(err) => err.into_response(),
            };
            Ok(Some(response))
        })
    }

    fn verify_credential<'a>(&'a self, credential: &'a Value) -> AuthFuture<'a, Verification> {
        Box::pin(async move {
            Ok(match user_of(credential) {
                Some(user) => Verification::accept(json!({ "user": user }), true),
                None => Verification::reject(400, "invalid dev credential"),
            })
        })
    }

    fn verify_refreshment<'a>(&'a self, data: &'a Value) -> AuthFuture<'a, Verification> {
        Box::pin(async move {
            Ok(match user_of(data) {
                Some(_) => Verification::accept(data.clone(), true),
                None => Verification::reject(401, "invalid dev session"),
            })
        })
    }

    fn refine_auth(&self, data: &Value) -> Option<RefinedAuth> {
        let user = user_of(data)?;
        Some(RefinedAuth {
            user: Principal::new(DEV_PLATFORM, user),
            channel: Principal::new(DEV_PLATFORM, user),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ServerAuthController, ServerConfig};
    use anyhow::Result;
    use axum::http::header::{LOCATION, SET_COOKIE};
    use secrecy::SecretString;
    use std::sync::Arc;
    use url::Url;

    fn controller(redirect_url: Option<&str>) -> Result<ServerAuthController> {
        let redirect_url = redirect_url.map(Url::parse).transpose()?;
        let config = ServerConfig::new(SecretString::from("secret".to_string()))
            .with_dev_mode(true)
            .with_redirect_url(redirect_url);
        Ok(ServerAuthController::new(config, vec![Arc::new(DevAuthorizer)])?)
    }

    fn get(uri: &str) -> Result<Request<Body>> {
        Ok(Request::builder()
            .uri(uri)
            .header("host", "localhost:8080")
            .body(Body::empty())?)
    }

    #[tokio::test]
    async fn verify_credential_requires_user() -> Result<()> {
        let authorizer = DevAuthorizer;
        assert_eq!(
            authorizer.verify_credential(&json!({ "user": "jojo" })).await?,
            Verification::accept(json!({ "user": "jojo" }), true)
        );
        assert!(matches!(
            authorizer.verify_credential(&json!({ "user": " " })).await?,
            Verification::Rejected(_)
        ));
        assert!(matches!(
            authorizer.verify_credential(&json!("jojo")).await?,
            Verification::Rejected(_)
        ));
        Ok(())
    }

    #[test]
    fn refine_auth_uses_user() {
        let refined = DevAuthorizer.refine_auth(&json!({ "user": "jojo" }));
        assert_eq!(
            refined.map(|refined| refined.user),
            Some(Principal::new("dev", "jojo"))
        );
        assert!(DevAuthorizer.refine_auth(&json!({})).is_none());
    }

    #[tokio::test]
    async fn login_redirects_with_session() -> Result<()> {
        let controller = controller(Some("http://localhost:8080/"))?;
        let response = controller
            .delegate_auth_request(get("/auth/dev/login?user=jojo&redirect=%2Fhome")?)
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("http://localhost:8080/home")
        );
        let cookies: Vec<&str> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert!(cookies.iter().any(|c| c.starts_with("crossauth_signature=") && !c.contains("Max-Age=0")));
        assert!(cookies.iter().any(|c| c.starts_with("crossauth_token=") && !c.contains("Max-Age=0")));
        Ok(())
    }

    #[tokio::test]
    async fn login_without_user_sets_error() -> Result<()> {
        let controller = controller(None)?;
        let response = controller.delegate_auth_request(get("/auth/dev/login")?).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let has_error = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|c| c.starts_with("crossauth_error=") && !c.contains("Max-Age=0"));
        assert!(has_error);
        Ok(())
    }

    #[tokio::test]
    async fn login_rejects_foreign_redirect() -> Result<()> {
        let controller = controller(Some("http://localhost:8080/"))?;
        let response = controller
            .delegate_auth_request(get("/auth/dev/login?user=jojo&redirect=https%3A%2F%2Fevil.org%2F")?)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn other_paths_are_not_found() -> Result<()> {
        let controller = controller(None)?;
        let response = controller.delegate_auth_request(get("/auth/dev/other")?).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }
}
