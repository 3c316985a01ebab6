//! API route definitions

use crate::auth::middleware::{require_access, require_refresh};
use crate::handlers::auth;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route(
            "/auth/request_password_reset",
            post(auth::request_password_reset_handler),
        )
        .route("/auth/reset_password", post(auth::reset_password_handler))
        .route(
            "/auth/one_time_code/request",
            post(auth::request_one_time_code_handler),
        )
        .route(
            "/auth/one_time_code/verify",
            post(auth::verify_one_time_code_handler),
        );

    // Access token required
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/me", get(auth::me_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_access));

    // Refresh token required
    let refresh_routes = Router::new()
        .route("/auth/refresh", post(auth::refresh_handler))
        .route_layer(middleware::from_fn_with_state(state, require_refresh));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(refresh_routes)
}
