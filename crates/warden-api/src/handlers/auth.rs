//! Authentication API handlers
//!
//! Thin wrappers around [`crate::auth::AuthService`]; every handler builds a
//! [`RequestContext`] from the headers for the audit log.

use crate::audit::RequestContext;
use crate::auth::{
    AccessTokenResponse, AuthenticatedUser, EmailRequest, LoginRequest, LogoutRequest,
    MessageResponse, RegisterRequest, ResetPasswordRequest, TokenPairResponse, UserInfo,
    VerifyCodeRequest,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Registration response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub message: String,
    pub user: UserInfo,
}

/// Register a new user account
///
/// # Responses
///
/// * `201 Created` - User registered
/// * `400 Bad Request` - Invalid input, or username/email already taken
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = RegisterResponse),
        (status = 400, description = "Invalid input or duplicate account", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let context = RequestContext::from_headers(&headers);
    let user = state.auth.register(request, &context).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            user,
        }),
    ))
}

/// Log in with a username or email and a password
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenPairResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>, AppError> {
    let context = RequestContext::from_headers(&headers);
    let tokens = state.auth.login(request, &context).await?;
    Ok(Json(tokens))
}

/// Issue a new access token
///
/// Requires a refresh token in the `Authorization` header.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    responses(
        (status = 200, description = "Token refreshed", body = AccessTokenResponse),
        (status = 401, description = "Invalid, expired or revoked refresh token", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
) -> Result<Json<AccessTokenResponse>, AppError> {
    let context = RequestContext::from_headers(&headers);
    let token = state.auth.refresh(&user, &context).await?;
    Ok(Json(token))
}

/// Log out
///
/// Revokes the presented access token. The optional body can name a refresh
/// token to revoke as well, or ask to end every session of the user.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    request_body(content = LogoutRequest, description = "Optional logout options"),
    responses(
        (status = 200, description = "Logout successful", body = MessageResponse),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> Result<Json<MessageResponse>, AppError> {
    let context = RequestContext::from_headers(&headers);
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let response = state.auth.logout(&user, request, &context).await?;
    Ok(Json(response))
}

/// Get the current user's profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "User profile", body = UserInfo),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError),
        (status = 404, description = "User no longer exists", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<UserInfo>, AppError> {
    let profile = state.auth.me(&user).await?;
    Ok(Json(profile))
}

/// Ask for a password reset email
///
/// The answer is the same whether or not the email is registered.
#[utoipa::path(
    post,
    path = "/api/v1/auth/request_password_reset",
    tag = "auth",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Request accepted", body = MessageResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
    )
)]
pub async fn request_password_reset_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let context = RequestContext::from_headers(&headers);
    let response = state.auth.request_password_reset(request, &context).await?;
    Ok(Json(response))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/api/v1/auth/reset_password",
    tag = "auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid or expired token, or weak password", body = crate::error::ApiError),
    )
)]
pub async fn reset_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let context = RequestContext::from_headers(&headers);
    let response = state.auth.reset_password(request, &context).await?;
    Ok(Json(response))
}

/// Mail a one-time login code
#[utoipa::path(
    post,
    path = "/api/v1/auth/one_time_code/request",
    tag = "auth",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 404, description = "Unknown email", body = crate::error::ApiError),
        (status = 503, description = "Code store unavailable", body = crate::error::ApiError),
    )
)]
pub async fn request_one_time_code_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let context = RequestContext::from_headers(&headers);
    let response = state.auth.request_one_time_code(request, &context).await?;
    Ok(Json(response))
}

/// Log in with a one-time code
#[utoipa::path(
    post,
    path = "/api/v1/auth/one_time_code/verify",
    tag = "auth",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Code accepted", body = TokenPairResponse),
        (status = 400, description = "Invalid, expired or wrong code", body = crate::error::ApiError),
        (status = 503, description = "Code store unavailable", body = crate::error::ApiError),
    )
)]
pub async fn verify_one_time_code_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<VerifyCodeRequest>,
) -> Result<Json<TokenPairResponse>, AppError> {
    let context = RequestContext::from_headers(&headers);
    let tokens = state.auth.verify_one_time_code(request, &context).await?;
    Ok(Json(tokens))
}
