//! HTTP handlers and routing

pub mod auth;
pub mod whitelist_admin;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::guard::AccessGuard;
use crate::state::IdgateState;

/// Liveness check
pub async fn health() -> &'static str {
    "ok"
}

/// Build the gateway router
///
/// `/auth/me` and `/admin/*` sit behind whitelist enforcement; every route
/// sees the bearer token's principal when one is present.
pub fn router(state: IdgateState) -> Router {
    let guard = state.guard().clone();

    let guarded = Router::new()
        .route("/auth/me", get(auth::me))
        .route(
            "/admin/whitelist",
            get(whitelist_admin::list)
                .post(whitelist_admin::add)
                .delete(whitelist_admin::remove),
        )
        .route_layer(middleware::from_fn_with_state(
            guard.clone(),
            AccessGuard::enforce,
        ));

    let cors = cors_layer(&state);

    Router::new()
        .route("/health", get(health))
        .route("/auth/{provider}/url", get(auth::authorization_url))
        .route("/auth/{provider}/callback", get(auth::callback))
        .route("/auth/validate", get(auth::validate))
        .merge(guarded)
        .layer(middleware::from_fn_with_state(guard, AccessGuard::authenticate))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(state: &IdgateState) -> CorsLayer {
    let frontend = &state.config().frontend;
    let origins: Vec<HeaderValue> = std::iter::once(&frontend.default_origin)
        .chain(&frontend.allowed_origins)
        .filter_map(|origin| {
            HeaderValue::from_str(origin.trim_end_matches('/'))
                .inspect_err(|_| tracing::warn!(%origin, "Ignoring invalid CORS origin"))
                .ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestGateway;
    use axum_test::TestServer;

    #[tokio::test]
    async fn test_health() {
        let gateway = TestGateway::new(vec![]);
        let server = TestServer::new(router(gateway.state.clone())).unwrap();

        let response = server.get("/health").await;
        response.assert_status_ok();
        response.assert_text("ok");
    }

    #[tokio::test]
    async fn test_cors_allows_frontend_origin() {
        let gateway = TestGateway::new(vec![]);
        let server = TestServer::new(router(gateway.state.clone())).unwrap();

        let response = server
            .get("/health")
            .add_header("origin", "http://localhost:3000")
            .await;
        assert_eq!(
            response.header("access-control-allow-origin"),
            "http://localhost:3000"
        );
    }
}
