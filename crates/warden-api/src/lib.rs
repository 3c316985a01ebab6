//! Warden API - authentication server
//!
//! HTTP endpoints for registration, login, token refresh and revocation,
//! password reset and one-time-code login.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod mail;
pub mod routes;
pub mod state;

use axum::{http::HeaderValue, routing::get, Json, Router};
use state::AppState;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// OpenAPI document served at `/api-docs/openapi.json`
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::auth::me_handler,
        handlers::auth::request_password_reset_handler,
        handlers::auth::reset_password_handler,
        handlers::auth::request_one_time_code_handler,
        handlers::auth::verify_one_time_code_handler,
    ),
    components(schemas(
        error::ApiError,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
        handlers::health::ReadinessChecks,
        handlers::auth::RegisterResponse,
        auth::RegisterRequest,
        auth::LoginRequest,
        auth::EmailRequest,
        auth::ResetPasswordRequest,
        auth::VerifyCodeRequest,
        auth::LogoutRequest,
        auth::TokenPairResponse,
        auth::AccessTokenResponse,
        auth::MessageResponse,
        auth::UserInfo,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Accounts, sessions and credentials"),
        (name = "health", description = "Liveness and readiness probes")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS from the configured origins; `*` or an empty list allows any origin
fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    base.allow_origin(AllowOrigin::list(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_auth_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/auth/login"));
        assert!(doc.paths.paths.contains_key("/api/v1/auth/one_time_code/verify"));
        assert!(doc.paths.paths.contains_key("/ready"));
    }

    #[test]
    fn test_cors_layer_accepts_mixed_origins() {
        // Invalid entries are skipped, not fatal
        let _ = cors_layer(&["https://app.example.com".to_string(), "bad\norigin".to_string()]);
        let _ = cors_layer(&[]);
        let _ = cors_layer(&["*".to_string()]);
    }
}
