//! OAuth2 login, linking and session handlers
//!
//! # Routes
//!
//! - `GET /auth/{provider}/url` returns the provider authorization URL
//! - `GET /auth/{provider}/callback` completes the flow with a 303 redirect
//! - `GET /auth/validate` checks a session token
//! - `GET /auth/me` returns the authenticated user

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::IdgateError;
use crate::guard::{bearer_token, MaybePrincipal, RequirePrincipal};
use crate::identity::User;
use crate::oauth2::OAuthProvider;
use crate::orchestrator::{AuthUrlParams, CallbackParams};
use crate::state::IdgateState;

/// Response for the authorization-URL endpoint
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUrlResponse {
    /// Provider authorization URL
    pub auth_url: String,
}

/// Query for the validate endpoint
#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    /// Session token; the `Authorization` header is used when absent
    pub token: Option<String>,
}

/// Response for the validate endpoint
#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    /// Whether the token is valid and its user exists
    pub valid: bool,
    /// The token's user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Why the token was rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidateResponse {
    fn invalid(error: impl Into<String>) -> Response {
        let body = Self {
            valid: false,
            user: None,
            error: Some(error.into()),
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Build the authorization URL for a provider
///
/// A `userId` parameter turns the request into a link request and must name
/// the caller's own account.
///
/// # Errors
///
/// Returns `BadRequest` for an unknown or unconfigured provider and
/// `Forbidden` for a `userId` that is not the caller's
///
/// # Example
///
/// ```bash
/// GET /auth/github/url?from=/reports&mode=popup
/// ```
///
/// Response:
/// ```json
/// { "authUrl": "https://github.com/login/oauth/authorize?..." }
/// ```
pub async fn authorization_url(
    State(state): State<IdgateState>,
    Path(provider): Path<String>,
    MaybePrincipal(principal): MaybePrincipal,
    Query(params): Query<AuthUrlParams>,
) -> Result<Json<AuthUrlResponse>, IdgateError> {
    let provider: OAuthProvider = provider.parse()?;
    let auth_url = state.orchestrator().authorization_url(
        provider,
        params,
        principal.map(|p| p.user_id),
    )?;
    Ok(Json(AuthUrlResponse { auth_url }))
}

/// Complete an OAuth2 flow
///
/// Always answers with a redirect, to the frontend on success and to its
/// error page on failure. The resolution runs on its own task so a client
/// disconnect cannot interrupt identity writes halfway.
pub async fn callback(
    State(state): State<IdgateState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let orchestrator = state.orchestrator();

    let provider: OAuthProvider = match provider.parse() {
        Ok(provider) => provider,
        Err(e) => {
            let err = IdgateError::from(e);
            let frontend = orchestrator.frontend();
            let origin = frontend.resolve_origin(None);
            return Redirect::to(&frontend.error_location(origin, &err.public_message()));
        }
    };

    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.handle_callback(provider, params).await })
    };

    match task.await {
        Ok(result) => Redirect::to(&result.location),
        Err(e) => {
            tracing::error!(%provider, error = %e, "Callback task failed");
            let frontend = orchestrator.frontend();
            let origin = frontend.resolve_origin(None);
            Redirect::to(&frontend.error_location(origin, "Internal server error"))
        }
    }
}

/// Validate a session token
///
/// Answers `{ "valid": true, "user": ... }`, or 401 with
/// `{ "valid": false, "error": ... }`.
///
/// # Errors
///
/// Returns `Database` if the user lookup fails
pub async fn validate(
    State(state): State<IdgateState>,
    Query(query): Query<ValidateQuery>,
    headers: axum::http::HeaderMap,
) -> Result<Response, IdgateError> {
    let Some(token) = query.token.as_deref().or_else(|| bearer_token(&headers)) else {
        return Ok(ValidateResponse::invalid("No token provided"));
    };

    let claims = match state.tokens().verify(token) {
        Ok(claims) => claims,
        Err(e) => return Ok(ValidateResponse::invalid(e.to_string())),
    };

    match state.identity().store().find_by_id(claims.user_id).await {
        Ok(Some(user)) => Ok(Json(ValidateResponse {
            valid: true,
            user: Some(user),
            error: None,
        })
        .into_response()),
        Ok(None) => Ok(ValidateResponse::invalid("User not found")),
        Err(e) => Err(crate::identity::IdentityError::from(e).into()),
    }
}

/// Current user
///
/// # Errors
///
/// Returns `InvalidToken` without a session and `UserNotFound` if the user
/// was deleted after the token was issued
pub async fn me(
    State(state): State<IdgateState>,
    RequirePrincipal(principal): RequirePrincipal,
) -> Result<Json<User>, IdgateError> {
    Ok(Json(state.identity().get_user(principal.user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::router;
    use crate::testing::{StaticProvider, TestGateway};
    use axum_test::TestServer;

    fn server(gateway: &TestGateway) -> TestServer {
        TestServer::new(router(gateway.state.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_authorization_url_for_configured_provider() {
        let gateway = TestGateway::new(vec![StaticProvider::github()]);
        let response = server(&gateway)
            .get("/auth/github/url")
            .add_query_param("from", "/reports")
            .await;

        response.assert_status_ok();
        let body: AuthUrlResponse = response.json();
        assert!(body.auth_url.starts_with("https://github.test/authorize?state="));
    }

    #[tokio::test]
    async fn test_authorization_url_unknown_provider() {
        let gateway = TestGateway::new(vec![StaticProvider::github()]);
        let response = server(&gateway).get("/auth/gitlab/url").await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_link_request_for_someone_else_is_forbidden() {
        let gateway = TestGateway::new(vec![StaticProvider::github()]);
        let response = server(&gateway)
            .get("/auth/github/url")
            .add_query_param("userId", uuid::Uuid::new_v4())
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_callback_unknown_provider_redirects() {
        let gateway = TestGateway::new(vec![StaticProvider::github()]);
        let response = server(&gateway)
            .get("/auth/gitlab/callback")
            .add_query_param("code", "c")
            .await;

        response.assert_status(StatusCode::SEE_OTHER);
        let location = response.header("location");
        assert!(location.to_str().unwrap().contains("/auth/error?message="));
    }

    #[tokio::test]
    async fn test_validate_without_token() {
        let gateway = TestGateway::new(vec![]);
        let response = server(&gateway).get("/auth/validate").await;

        response.assert_status_unauthorized();
        let body: serde_json::Value = response.json();
        assert_eq!(body["valid"], false);
    }

    #[tokio::test]
    async fn test_me_requires_session() {
        let gateway = TestGateway::new(vec![]);
        server(&gateway).get("/auth/me").await.assert_status_unauthorized();
    }
}
